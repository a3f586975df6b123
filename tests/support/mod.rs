#![allow(dead_code)]

use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes, to_bytes},
    http::{Request, Response},
};
use reelhouse::{
    application::{
        repos::{CatalogRepo, RepoError},
        sitemap::{SitemapPolicy, SitemapService, default_robots_txt},
    },
    cache::CacheStore,
    config::AuthSettings,
    domain::catalog::{CatalogEntry, CatalogKind, PostType},
    infra::{
        http::{
            CacheHeaderState, HttpState, OptimizeState, PublicLayers, SecurityState, ViewerPolicy,
            build_router,
        },
        upstream::UpstreamProxy,
    },
    optimize::{HtmlOptimizer, hints::CRITICAL_CSS},
};
use time::macros::datetime;
use tower::ServiceExt;
use url::Url;

pub const PUBLIC_URL: &str = "https://watch.example.com";
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn public_url() -> Url {
    Url::parse(PUBLIC_URL).expect("public url")
}

pub fn layers(public_dir: &Path) -> PublicLayers {
    let optimizer = HtmlOptimizer::new(
        public_dir.join("build/manifest.json"),
        "/build/",
        CRITICAL_CSS,
    );
    PublicLayers {
        security: SecurityState {
            trust_forwarded_proto: true,
        },
        viewer: ViewerPolicy::new(&AuthSettings {
            session_cookie_prefixes: vec!["remember_web_".to_string()],
        }),
        cache_headers: CacheHeaderState {
            max_body_bytes: MAX_BODY_BYTES,
        },
        optimize: OptimizeState {
            optimizer: Arc::new(optimizer),
            max_body_bytes: MAX_BODY_BYTES,
        },
    }
}

pub fn public_router(public_dir: &Path, sitemap: Option<Arc<SitemapService>>) -> Router {
    let state = HttpState {
        public_dir: Arc::new(public_dir.to_path_buf()),
        default_robots: Arc::from(default_robots_txt(&public_url())),
        upstream: None,
        db: None,
    };
    build_router(state, sitemap, layers(public_dir))
}

/// Public router whose fallback forwards to `upstream`.
pub fn proxy_router(public_dir: &Path, upstream: Url) -> Router {
    let proxy = UpstreamProxy::new(upstream, Duration::from_secs(5), MAX_BODY_BYTES)
        .expect("proxy should build");
    let state = HttpState {
        public_dir: Arc::new(public_dir.to_path_buf()),
        default_robots: Arc::from(default_robots_txt(&public_url())),
        upstream: Some(Arc::new(proxy)),
        db: None,
    };
    build_router(state, None, layers(public_dir))
}

/// Serves `app` on an ephemeral local port and returns its base URL.
pub async fn spawn_upstream(app: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("upstream serves");
    });
    Url::parse(&format!("http://{addr}/")).expect("upstream url")
}

pub fn sitemap_service(
    catalog: Arc<FakeCatalog>,
    cache: Arc<dyn CacheStore>,
    page_size: u32,
) -> Arc<SitemapService> {
    let policy = SitemapPolicy {
        page_size,
        ttl: Duration::from_secs(3600),
        genre_ttl: Duration::from_secs(7200),
    };
    Arc::new(SitemapService::new(catalog, cache, policy, &public_url()))
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should collect")
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).expect("utf-8 body")
}

/// In-memory catalog.
#[derive(Default)]
pub struct FakeCatalog {
    rows: Mutex<Vec<CatalogEntry>>,
}

impl FakeCatalog {
    pub fn add(&self, kind: CatalogKind, slug: &str) {
        let post_type = (kind == CatalogKind::Post).then_some(PostType::Movie);
        self.rows.lock().expect("rows lock").push(CatalogEntry {
            kind,
            slug: slug.to_string(),
            post_type,
            updated_at: Some(datetime!(2024-05-01 12:00 UTC)),
        });
    }
}

#[async_trait]
impl CatalogRepo for FakeCatalog {
    async fn count(&self, kind: CatalogKind) -> Result<u64, RepoError> {
        let rows = self.rows.lock().expect("rows lock");
        Ok(rows.iter().filter(|row| row.kind == kind).count() as u64)
    }

    async fn list(
        &self,
        kind: CatalogKind,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<CatalogEntry>, RepoError> {
        let rows = self.rows.lock().expect("rows lock");
        Ok(rows
            .iter()
            .filter(|row| row.kind == kind)
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
