mod admin;
mod headers;
mod middleware;
mod optimize;
mod public;
mod security;

pub use admin::{AdminState, FLUSH_PATH, build_admin_router};
pub use headers::{CacheHeaderState, CachePolicy, HTML_MAX_AGE, JSON_MAX_AGE, body_etag};
pub use middleware::{RequestContext, Viewer, ViewerPolicy};
pub use optimize::OptimizeState;
pub use public::{HttpState, PublicLayers, build_router, parse_sitemap_file};
pub use security::{CONTENT_SECURITY_POLICY, SecurityState};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sqlx::Error as SqlxError;

use crate::application::error::ErrorReport;

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
