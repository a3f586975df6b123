//! Reverse proxy to the application server that renders the pages.

use std::time::Duration;

use axum::{
    body::{Body, HttpBody},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, header},
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, future, stream};
use reqwest::{Client, Url, redirect};

use super::error::InfraError;

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

#[derive(Clone, Debug)]
pub struct UpstreamProxy {
    client: Client,
    base: Url,
    /// Largest HTML page held in memory for rewriting.
    max_body_bytes: usize,
}

impl UpstreamProxy {
    pub fn new(base: Url, timeout: Duration, max_body_bytes: usize) -> Result<Self, InfraError> {
        // Idle timeouts only: media downloads may legitimately run for minutes.
        let client = Client::builder()
            .user_agent(concat!("reelhouse/", env!("CARGO_PKG_VERSION")))
            .redirect(redirect::Policy::none())
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|err| InfraError::upstream(format!("failed to build client: {err}")))?;
        Ok(Self {
            client,
            base,
            max_body_bytes,
        })
    }

    pub fn target(&self, request: &Request<Body>) -> Result<Url, InfraError> {
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|value| value.as_str())
            .unwrap_or("/");
        self.base
            .join(path_and_query)
            .map_err(|err| InfraError::upstream(format!("invalid upstream path: {err}")))
    }

    /// Forwards the request. HTML pages within the buffer limit arrive fully
    /// buffered; every other body streams through.
    pub async fn forward(&self, request: Request<Body>) -> Result<Response, InfraError> {
        let target = self.target(&request)?;
        let (parts, body) = request.into_parts();
        let head_only = parts.method == Method::HEAD;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        // The optimizer rewrites plain HTML only.
        headers.remove(header::ACCEPT_ENCODING);
        if let Some(host) = headers.remove(header::HOST) {
            headers.insert(X_FORWARDED_HOST, host);
        }

        let mut outbound = self.client.request(parts.method, target).headers(headers);
        if body.size_hint().exact() != Some(0) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }
        let upstream = outbound
            .send()
            .await
            .map_err(|err| InfraError::upstream(err.to_string()))?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let body = if !head_only && rewritable_html(&headers, self.max_body_bytes) {
            buffer_html(upstream, self.max_body_bytes, &mut headers).await?
        } else {
            Body::from_stream(upstream.bytes_stream())
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Uncompressed HTML whose declared length, if any, fits the buffer.
fn rewritable_html(headers: &HeaderMap, limit: usize) -> bool {
    let html = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("text/html"));
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    html
        && !headers.contains_key(header::CONTENT_ENCODING)
        && declared.is_none_or(|len| len <= limit as u64)
}

async fn buffer_html(
    mut upstream: reqwest::Response,
    limit: usize,
    headers: &mut HeaderMap,
) -> Result<Body, InfraError> {
    let mut buffered = BytesMut::new();
    while let Some(chunk) = upstream
        .chunk()
        .await
        .map_err(|err| InfraError::upstream(err.to_string()))?
    {
        buffered.extend_from_slice(&chunk);
        if buffered.len() > limit {
            // Too large to rewrite: replay what was read, then stream the rest.
            let head: Bytes = buffered.freeze();
            let replay = stream::once(future::ready(Ok::<_, reqwest::Error>(head)));
            return Ok(Body::from_stream(replay.chain(upstream.bytes_stream())));
        }
    }

    let bytes = buffered.freeze();
    if let Ok(value) = HeaderValue::from_str(&bytes.len().to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    Ok(Body::from(bytes))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}
