//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::worker::WorkerConfig;

pub use cli::{
    ClearAllArgs, CliArgs, Command, DatabaseOverride, OptimizeArgs, PrecacheArgs,
    PublicDirOverride, ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "reelhouse";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_SITE_NAME: &str = "Reelhouse";
const DEFAULT_PUBLIC_URL: &str = "http://localhost:3000";
const DEFAULT_PUBLIC_DIR: &str = "public";
const DEFAULT_CACHE_CAPACITY: u64 = 1024;
const DEFAULT_CACHE_MAX_BODY_BYTES: u64 = 2 * 1024 * 1024;
const DEFAULT_SITEMAP_PAGE_SIZE: u64 = 1000;
const DEFAULT_SITEMAP_TTL_SECS: u64 = 3600;
const DEFAULT_SITEMAP_GENRE_TTL_SECS: u64 = 7200;
const DEFAULT_MANIFEST_PATH: &str = "public/build/manifest.json";
const DEFAULT_ASSET_BASE: &str = "/build/";
const DEFAULT_SESSION_COOKIE_PREFIX: &str = "remember_web_";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub site: SiteSettings,
    pub cache: CacheSettings,
    pub sitemap: SitemapSettings,
    pub optimize: OptimizeSettings,
    pub auth: AuthSettings,
    pub security: SecuritySettings,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub name: String,
    pub public_url: Url,
    pub public_dir: PathBuf,
    pub upstream_url: Option<Url>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub capacity: NonZeroUsize,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct SitemapSettings {
    pub page_size: NonZeroU32,
    pub ttl: Duration,
    pub genre_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct OptimizeSettings {
    pub manifest_path: PathBuf,
    pub asset_base: String,
    pub critical_css_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub session_cookie_prefixes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SecuritySettings {
    pub trust_forwarded_proto: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("REELHOUSE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Optimize(args)) => {
            raw.apply_database_override(&args.database);
            raw.apply_public_dir_override(&args.public_dir);
        }
        Some(Command::ClearAll(args)) => raw.apply_public_dir_override(&args.public_dir),
        Some(Command::Precache(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    site: RawSiteSettings,
    cache: RawCacheSettings,
    sitemap: RawSitemapSettings,
    optimize: RawOptimizeSettings,
    auth: RawAuthSettings,
    security: RawSecuritySettings,
    worker: WorkerConfig,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.upstream_url.as_ref() {
            self.site.upstream_url = Some(url.clone());
        }
        if let Some(capacity) = overrides.cache_capacity {
            self.cache.capacity = Some(capacity);
        }
        if let Some(size) = overrides.sitemap_page_size {
            self.sitemap.page_size = Some(size);
        }

        self.apply_database_override(&overrides.database);
        self.apply_public_dir_override(&overrides.public_dir);
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_public_dir_override(&mut self, overrides: &PublicDirOverride) {
        if let Some(dir) = overrides.public_dir.as_ref() {
            self.site.public_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            site,
            cache,
            sitemap,
            optimize,
            auth,
            security,
            worker,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            site: build_site_settings(site)?,
            cache: build_cache_settings(cache)?,
            sitemap: build_sitemap_settings(sitemap)?,
            optimize: build_optimize_settings(optimize)?,
            auth: build_auth_settings(auth),
            security: SecuritySettings {
                trust_forwarded_proto: security.trust_forwarded_proto.unwrap_or(true),
            },
            worker: validate_worker(worker)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url,
        max_connections: non_zero_u32(max.into(), "database.max_connections")?,
    })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let name = site
        .name
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_SITE_NAME.to_string());

    let public_url = site
        .public_url
        .as_deref()
        .unwrap_or(DEFAULT_PUBLIC_URL);
    let public_url = parse_http_url(public_url, "site.public_url")?;

    let public_dir = site
        .public_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLIC_DIR));
    if public_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "site.public_dir",
            "path must not be empty",
        ));
    }

    let upstream_url = match site.upstream_url.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Some(parse_http_url(value, "site.upstream_url")?),
        _ => None,
    };

    Ok(SiteSettings {
        name,
        public_url,
        public_dir,
        upstream_url,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let capacity_value = cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY);
    let capacity = usize::try_from(capacity_value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| LoadError::invalid("cache.capacity", "must be greater than zero"))?;

    let max_body_value = cache.max_body_bytes.unwrap_or(DEFAULT_CACHE_MAX_BODY_BYTES);
    if max_body_value == 0 {
        return Err(LoadError::invalid(
            "cache.max_body_bytes",
            "must be greater than zero",
        ));
    }
    let max_body_bytes = usize::try_from(max_body_value).map_err(|_| {
        LoadError::invalid(
            "cache.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(CacheSettings {
        capacity,
        max_body_bytes,
    })
}

fn build_sitemap_settings(sitemap: RawSitemapSettings) -> Result<SitemapSettings, LoadError> {
    let page_size = non_zero_u32(
        sitemap.page_size.unwrap_or(DEFAULT_SITEMAP_PAGE_SIZE),
        "sitemap.page_size",
    )?;
    // The sitemap protocol caps a single urlset at 50,000 URLs.
    if page_size.get() > 50_000 {
        return Err(LoadError::invalid(
            "sitemap.page_size",
            "must not exceed 50000",
        ));
    }

    let ttl = non_zero_secs(
        sitemap.ttl_seconds.unwrap_or(DEFAULT_SITEMAP_TTL_SECS),
        "sitemap.ttl_seconds",
    )?;
    let genre_ttl = non_zero_secs(
        sitemap
            .genre_ttl_seconds
            .unwrap_or(DEFAULT_SITEMAP_GENRE_TTL_SECS),
        "sitemap.genre_ttl_seconds",
    )?;

    Ok(SitemapSettings {
        page_size,
        ttl,
        genre_ttl,
    })
}

fn build_optimize_settings(optimize: RawOptimizeSettings) -> Result<OptimizeSettings, LoadError> {
    let manifest_path = optimize
        .manifest_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST_PATH));

    let mut asset_base = optimize
        .asset_base
        .unwrap_or_else(|| DEFAULT_ASSET_BASE.to_string());
    if !asset_base.starts_with('/') && !asset_base.starts_with("http") {
        return Err(LoadError::invalid(
            "optimize.asset_base",
            "must be an absolute path or URL",
        ));
    }
    if !asset_base.ends_with('/') {
        asset_base.push('/');
    }

    let critical_css_path = optimize
        .critical_css_path
        .filter(|path| !path.as_os_str().is_empty());

    Ok(OptimizeSettings {
        manifest_path,
        asset_base,
        critical_css_path,
    })
}

fn build_auth_settings(auth: RawAuthSettings) -> AuthSettings {
    let session_cookie_prefixes = match auth.session_cookie_prefixes {
        Some(prefixes) => prefixes
            .into_iter()
            .map(|prefix| prefix.trim().to_string())
            .filter(|prefix| !prefix.is_empty())
            .collect(),
        None => vec![DEFAULT_SESSION_COOKIE_PREFIX.to_string()],
    };

    AuthSettings {
        session_cookie_prefixes,
    }
}

fn validate_worker(worker: WorkerConfig) -> Result<WorkerConfig, LoadError> {
    if worker.max_entries == 0 {
        return Err(LoadError::invalid(
            "worker.max_entries",
            "must be greater than zero",
        ));
    }
    if worker.max_age_seconds == 0 {
        return Err(LoadError::invalid(
            "worker.max_age_seconds",
            "must be greater than zero",
        ));
    }
    if worker.maintenance_interval_seconds == 0 {
        return Err(LoadError::invalid(
            "worker.maintenance_interval_seconds",
            "must be greater than zero",
        ));
    }
    Ok(worker)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    name: Option<String>,
    public_url: Option<String>,
    public_dir: Option<PathBuf>,
    upstream_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    capacity: Option<u64>,
    max_body_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSitemapSettings {
    page_size: Option<u64>,
    ttl_seconds: Option<u64>,
    genre_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOptimizeSettings {
    manifest_path: Option<PathBuf>,
    asset_base: Option<String>,
    critical_css_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    session_cookie_prefixes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSecuritySettings {
    trust_forwarded_proto: Option<bool>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value).map_err(|err| LoadError::invalid(key, err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(key, "scheme must be http or https"));
    }
    Ok(url)
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}
