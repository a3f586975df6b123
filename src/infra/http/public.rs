use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, Method, Request, StatusCode, header::ACCEPT, header::CONTENT_TYPE},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use serde_json::json;
use tracing::warn;

use crate::{
    application::{
        error::{AppError, ErrorReport, HttpError},
        sitemap::SitemapService,
    },
    domain::catalog::CatalogKind,
    infra::{assets::read_public_file, db::PostgresCatalog, upstream::UpstreamProxy},
};

use super::{
    db_health_response,
    headers::{CacheHeaderState, apply_cache_headers},
    middleware::{ViewerPolicy, log_responses, resolve_viewer, set_request_context},
    optimize::{OptimizeState, optimize_html},
    security::{SecurityState, apply_security_headers},
};

#[derive(Clone)]
pub struct HttpState {
    pub public_dir: Arc<PathBuf>,
    pub default_robots: Arc<str>,
    pub upstream: Option<Arc<UpstreamProxy>>,
    pub db: Option<Arc<PostgresCatalog>>,
}

/// Middleware state for the public listener.
#[derive(Clone)]
pub struct PublicLayers {
    pub security: SecurityState,
    pub viewer: ViewerPolicy,
    pub cache_headers: CacheHeaderState,
    pub optimize: OptimizeState,
}

pub fn build_router(
    state: HttpState,
    sitemap: Option<Arc<SitemapService>>,
    layers: PublicLayers,
) -> Router {
    let mut router = Router::new()
        .route("/robots.txt", get(robots_txt))
        .route("/_health", get(public_health))
        .fallback(fallback)
        .with_state(state);

    // Without a catalog the sitemap paths fall through to the upstream or public dir.
    if let Some(sitemap) = sitemap {
        router = router.merge(sitemap_routes(sitemap));
    }

    // Outermost last: request context, viewer, logging, security, cache headers, optimizer.
    router
        .layer(middleware::from_fn_with_state(layers.optimize, optimize_html))
        .layer(middleware::from_fn_with_state(
            layers.cache_headers,
            apply_cache_headers,
        ))
        .layer(middleware::from_fn_with_state(
            layers.security,
            apply_security_headers,
        ))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn_with_state(layers.viewer, resolve_viewer))
        .layer(middleware::from_fn(set_request_context))
}

fn sitemap_routes(sitemap: Arc<SitemapService>) -> Router {
    Router::new()
        .route("/sitemap.xml", get(sitemap_index))
        .route("/sitemaps/{file}", get(sitemap_page))
        .with_state(sitemap)
}

async fn sitemap_index(State(sitemap): State<Arc<SitemapService>>) -> Result<Response, HttpError> {
    let body = sitemap.index_xml().await?;
    Ok(xml_response(body))
}

async fn sitemap_page(
    State(sitemap): State<Arc<SitemapService>>,
    Path(file): Path<String>,
) -> Result<Response, HttpError> {
    let Some((kind, page)) = parse_sitemap_file(&file) else {
        return Err(HttpError::new(
            "infra::http::public::sitemap_page",
            StatusCode::NOT_FOUND,
            "Sitemap not found",
            format!("no sitemap named `{file}`"),
        ));
    };

    let body = sitemap.page_xml(kind, page).await?;
    Ok(xml_response(body))
}

/// `post-3.xml` → `(Post, 3)`.
pub fn parse_sitemap_file(file: &str) -> Option<(CatalogKind, u32)> {
    let stem = file.strip_suffix(".xml")?;
    let (kind, page) = stem.rsplit_once('-')?;
    let kind = kind.parse::<CatalogKind>().ok()?;
    let page = page.parse::<u32>().ok().filter(|page| *page > 0)?;
    Some((kind, page))
}

async fn robots_txt(State(state): State<HttpState>) -> Response {
    let path = state.public_dir.join("robots.txt");
    let body = match tokio::fs::read_to_string(&path).await {
        Ok(body) => body,
        Err(err) => {
            if err.kind() != ErrorKind::NotFound {
                warn!(
                    target = "reelhouse::http::robots",
                    path = %path.display(),
                    error = %err,
                    "serving default robots.txt"
                );
            }
            state.default_robots.to_string()
        }
    };

    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

async fn public_health(State(state): State<HttpState>) -> Response {
    match state.db.as_ref() {
        Some(db) => db_health_response(db.health_check().await),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn fallback(State(state): State<HttpState>, request: Request<Body>) -> Response {
    if let Some(upstream) = state.upstream.as_ref() {
        return match upstream.forward(request).await {
            Ok(response) => response,
            Err(err) => AppError::from(err).into_response(),
        };
    }

    let wants_json = accepts_json(request.headers());
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return not_found_response(wants_json);
    }

    match read_public_file(&state.public_dir, request.uri().path()).await {
        Ok(Some(response)) => response,
        Ok(None) => not_found_response(wants_json),
        Err(response) => response,
    }
}

fn accepts_json(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"))
}

fn not_found_response(wants_json: bool) -> Response {
    let mut response = if wants_json {
        (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
    } else {
        (StatusCode::NOT_FOUND, "Not Found").into_response()
    };
    ErrorReport::from_message(
        "infra::http::public::fallback",
        StatusCode::NOT_FOUND,
        "no route or file matched",
    )
    .attach(&mut response);
    response
}

fn xml_response(body: Bytes) -> Response {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "application/xml; charset=utf-8")],
        body,
    )
        .into_response()
}
