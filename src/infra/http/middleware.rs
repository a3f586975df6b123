use std::{sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::{application::error::ErrorReport, config::AuthSettings};

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub started_at: Instant,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: Uuid::new_v4().to_string(),
        started_at: Instant::now(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Whether the request belongs to a signed-in user of the CMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    Authenticated,
}

impl Viewer {
    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated)
    }

    pub fn from_headers(headers: &HeaderMap, cookie_prefixes: &[String]) -> Self {
        if headers.contains_key(header::AUTHORIZATION) {
            return Self::Authenticated;
        }

        let has_session = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.split_once('=').map(|(name, _)| name.trim()))
            .any(|name| {
                cookie_prefixes
                    .iter()
                    .any(|prefix| name.starts_with(prefix.as_str()))
            });

        if has_session {
            Self::Authenticated
        } else {
            Self::Anonymous
        }
    }
}

#[derive(Clone)]
pub struct ViewerPolicy {
    cookie_prefixes: Arc<[String]>,
}

impl ViewerPolicy {
    pub fn new(auth: &AuthSettings) -> Self {
        Self {
            cookie_prefixes: auth.session_cookie_prefixes.clone().into(),
        }
    }
}

pub async fn resolve_viewer(
    State(policy): State<ViewerPolicy>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let viewer = Viewer::from_headers(request.headers(), &policy.cookie_prefixes);
    request.extensions_mut().insert(viewer);
    next.run(request).await
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();
    let authenticated = request
        .extensions()
        .get::<Viewer>()
        .is_some_and(|viewer| viewer.is_authenticated());

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "reelhouse::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                authenticated = authenticated,
                "request failed",
            );
        } else {
            warn!(
                target = "reelhouse::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                authenticated = authenticated,
                "client request error",
            );
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn prefixes() -> Vec<String> {
        vec!["remember_web_".to_string()]
    }

    #[test]
    fn anonymous_without_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; XSRF-TOKEN=abc"));
        assert_eq!(Viewer::from_headers(&headers, &prefixes()), Viewer::Anonymous);
    }

    #[test]
    fn session_cookie_marks_authenticated() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; remember_web_59ba36=eyJpdiI6"),
        );
        assert_eq!(
            Viewer::from_headers(&headers, &prefixes()),
            Viewer::Authenticated
        );
    }

    #[test]
    fn authorization_header_marks_authenticated() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        assert!(Viewer::from_headers(&headers, &[]).is_authenticated());
    }
}
