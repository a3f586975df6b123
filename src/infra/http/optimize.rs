use std::{sync::Arc, time::Instant};

use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{
        HeaderName, HeaderValue, Request, StatusCode,
        header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, LINK, VARY},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::warn;

use crate::{application::error::ErrorReport, optimize::HtmlOptimizer};

use super::{headers::fits_in_buffer, middleware::RequestContext};

const X_DNS_PREFETCH_CONTROL: HeaderName = HeaderName::from_static("x-dns-prefetch-control");
const SERVER_TIMING: HeaderName = HeaderName::from_static("server-timing");

#[derive(Clone)]
pub struct OptimizeState {
    pub optimizer: Arc<HtmlOptimizer>,
    pub max_body_bytes: usize,
}

/// Uncompressed `text/html`; encoded bodies cannot be rewritten.
fn is_html(response: &Response) -> bool {
    if response.headers().contains_key(CONTENT_ENCODING) {
        return false;
    }
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("text/html"))
}

pub async fn optimize_html(
    State(state): State<OptimizeState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    const SOURCE: &str = "infra::http::optimize::optimize_html";

    let started_at = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.started_at)
        .unwrap_or_else(Instant::now);

    let response = next.run(request).await;
    if !is_html(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    if !fits_in_buffer(&parts.headers, &body, state.max_body_bytes) {
        return Response::from_parts(parts, body);
    }

    let bytes = match to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            ErrorReport::from_error(SOURCE, StatusCode::INTERNAL_SERVER_ERROR, &err)
                .attach(&mut response);
            return response;
        }
    };

    let preloads = state.optimizer.preloads().await;

    let rewrite_started = Instant::now();
    let optimized = match std::str::from_utf8(&bytes) {
        Ok(html) => state
            .optimizer
            .optimize(html, &preloads)
            .map_err(|err| err.to_string()),
        Err(err) => Err(format!("html body is not valid utf-8: {err}")),
    };
    let body = match optimized {
        Ok(optimized) => {
            counter!("reelhouse_html_optimized_total").increment(1);
            histogram!("reelhouse_html_optimize_ms")
                .record(rewrite_started.elapsed().as_secs_f64() * 1000.0);
            Bytes::from(optimized)
        }
        Err(reason) => {
            warn!(target = "reelhouse::optimize", error = %reason, "serving unoptimized html");
            bytes
        }
    };

    let headers = &mut parts.headers;
    headers.insert(X_DNS_PREFETCH_CONTROL, HeaderValue::from_static("on"));
    headers.insert(VARY, HeaderValue::from_static("Accept-Encoding"));
    let link = preloads
        .iter()
        .map(|preload| preload.link_header_value())
        .collect::<Vec<_>>()
        .join(", ");
    if !link.is_empty()
        && let Ok(value) = HeaderValue::from_str(&link)
    {
        headers.insert(LINK, value);
    }
    let timing = format!("app;dur={:.1}", started_at.elapsed().as_secs_f64() * 1000.0);
    if let Ok(value) = HeaderValue::from_str(&timing) {
        headers.insert(SERVER_TIMING, value);
    }
    if let Ok(value) = HeaderValue::from_str(&body.len().to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }

    Response::from_parts(parts, Body::from(body))
}
