use std::{process, sync::Arc, time::Duration};

use reelhouse::{
    application::{
        error::AppError,
        generate::{StaticFiles, clear_generated},
        repos::CatalogRepo,
        sitemap::{SitemapPolicy, SitemapService, default_robots_txt},
    },
    cache::{CacheConfig, CacheStore, MemoryStore},
    config,
    infra::{
        db::PostgresCatalog,
        error::InfraError,
        http::{
            self, AdminState, CacheHeaderState, FLUSH_PATH, HttpState, OptimizeState,
            PublicLayers, SecurityState, ViewerPolicy,
        },
        telemetry,
        upstream::UpstreamProxy,
    },
    optimize::HtmlOptimizer,
    worker::{CacheEngine, ReqwestFetcher, SystemClock},
};
use tokio::try_join;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Optimize(args) => run_optimize(settings, args).await,
        config::Command::ClearAll(args) => run_clear_all(settings, args).await,
        config::Command::Precache(args) => run_precache(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    let cache: Arc<dyn CacheStore> = Arc::new(MemoryStore::new(&cache_config));

    let db = connect_catalog(&settings).await;
    let sitemap = db
        .as_ref()
        .map(|db| build_sitemap_service(&settings, db, Arc::clone(&cache)));

    let upstream = settings
        .site
        .upstream_url
        .clone()
        .map(|url| {
            info!(target = "reelhouse::serve", upstream = %url, "proxying unmatched requests");
            UpstreamProxy::new(url, OUTBOUND_TIMEOUT, cache_config.max_body_bytes).map(Arc::new)
        })
        .transpose()?;

    let optimizer = Arc::new(HtmlOptimizer::from_settings(&settings.optimize).await);

    let http_state = HttpState {
        public_dir: Arc::new(settings.site.public_dir.clone()),
        default_robots: Arc::from(default_robots_txt(&settings.site.public_url)),
        upstream,
        db: db.clone(),
    };
    let layers = PublicLayers {
        security: SecurityState {
            trust_forwarded_proto: settings.security.trust_forwarded_proto,
        },
        viewer: ViewerPolicy::new(&settings.auth),
        cache_headers: CacheHeaderState {
            max_body_bytes: cache_config.max_body_bytes,
        },
        optimize: OptimizeState {
            optimizer,
            max_body_bytes: cache_config.max_body_bytes,
        },
    };
    let admin_state = AdminState { cache, db };

    serve_http(&settings, http_state, sitemap, layers, admin_state).await
}

async fn run_optimize(
    settings: config::Settings,
    args: config::OptimizeArgs,
) -> Result<(), AppError> {
    let optimizer = HtmlOptimizer::from_settings(&settings.optimize).await;

    let cache_config = CacheConfig::from(&settings.cache);
    let cache: Arc<dyn CacheStore> = Arc::new(MemoryStore::new(&cache_config));
    let sitemap = connect_catalog(&settings)
        .await
        .map(|db| build_sitemap_service(&settings, &db, cache));

    let files = StaticFiles::new(
        settings.site.public_dir.clone(),
        settings.site.name.clone(),
        settings.site.public_url.clone(),
        optimizer.critical_css(),
    );
    let report = files.generate(sitemap.as_deref(), args.force).await;

    info!(
        target = "reelhouse::optimize",
        public_dir = %files.public_dir().display(),
        written = ?report.written,
        kept = ?report.kept,
        failed = ?report.failed,
        "optimize completed"
    );
    Ok(())
}

async fn run_clear_all(
    settings: config::Settings,
    args: config::ClearAllArgs,
) -> Result<(), AppError> {
    let flush_url = format!("http://{}{FLUSH_PATH}", settings.server.admin_addr);
    let client = reqwest::Client::builder()
        .timeout(OUTBOUND_TIMEOUT)
        .build()
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;

    match client.post(&flush_url).send().await {
        Ok(response) if response.status().is_success() => {
            info!(target = "reelhouse::clear_all", "server cache flushed");
        }
        Ok(response) => {
            warn!(
                target = "reelhouse::clear_all",
                status = response.status().as_u16(),
                "server refused cache flush"
            );
        }
        Err(err) => {
            warn!(
                target = "reelhouse::clear_all",
                url = %flush_url,
                error = %err,
                "server unreachable; cache not flushed"
            );
        }
    }

    if args.force {
        let removed = clear_generated(&settings.site.public_dir).await;
        info!(target = "reelhouse::clear_all", removed = ?removed, "generated files deleted");
    }

    Ok(())
}

async fn run_precache(
    settings: config::Settings,
    args: config::PrecacheArgs,
) -> Result<(), AppError> {
    let fetcher = ReqwestFetcher::new(OUTBOUND_TIMEOUT)
        .map_err(|err| AppError::from(InfraError::configuration(err.to_string())))?;
    let engine = CacheEngine::new(
        settings.worker.clone(),
        args.origin,
        Arc::new(fetcher),
        Arc::new(SystemClock),
    );

    let install = engine.install().await;
    let stale = engine.activate();

    info!(
        target = "reelhouse::precache",
        critical = install.critical,
        static_assets = install.static_assets,
        failed = install.failed,
        stale_caches = stale.len(),
        caches = ?engine.storage().cache_names(),
        "precache completed"
    );
    Ok(())
}

/// Connects the catalog when a database is configured. A failed connection
/// leaves the server running without sitemaps.
async fn connect_catalog(settings: &config::Settings) -> Option<Arc<PostgresCatalog>> {
    let url = settings.database.url.as_deref()?;
    match PostgresCatalog::connect(url, settings.database.max_connections.get()).await {
        Ok(pool) => Some(Arc::new(PostgresCatalog::new(pool))),
        Err(err) => {
            let err = InfraError::database(err.to_string());
            warn!(target = "reelhouse::db", error = %err, "catalog unavailable; sitemaps disabled");
            None
        }
    }
}

fn build_sitemap_service(
    settings: &config::Settings,
    db: &Arc<PostgresCatalog>,
    cache: Arc<dyn CacheStore>,
) -> Arc<SitemapService> {
    let catalog: Arc<dyn CatalogRepo> = db.clone();
    Arc::new(SitemapService::new(
        catalog,
        cache,
        SitemapPolicy::from(&settings.sitemap),
        &settings.site.public_url,
    ))
}

async fn serve_http(
    settings: &config::Settings,
    http_state: HttpState,
    sitemap: Option<Arc<SitemapService>>,
    layers: PublicLayers,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let public_router = http::build_router(http_state, sitemap, layers);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "reelhouse::serve",
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        "listening"
    );

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = async { try_join!(public_server, admin_server) } => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = async {
            shutdown_signal().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target = "reelhouse::serve",
                grace_seconds = grace.as_secs(),
                "graceful shutdown timed out"
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
