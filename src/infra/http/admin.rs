use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tracing::info;

use crate::{cache::CacheStore, infra::db::PostgresCatalog};

use super::{
    db_health_response,
    middleware::{log_responses, set_request_context},
};

pub const FLUSH_PATH: &str = "/_admin/cache/flush";

#[derive(Clone)]
pub struct AdminState {
    pub cache: Arc<dyn CacheStore>,
    pub db: Option<Arc<PostgresCatalog>>,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route(FLUSH_PATH, post(flush_cache))
        .route("/_admin/health", get(admin_health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn flush_cache(State(state): State<AdminState>) -> Response {
    state.cache.flush().await;
    info!(target = "reelhouse::http::admin", "cache flushed");
    StatusCode::NO_CONTENT.into_response()
}

async fn admin_health(State(state): State<AdminState>) -> Response {
    match state.db.as_ref() {
        Some(db) => db_health_response(db.health_check().await),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
