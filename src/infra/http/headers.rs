//! Cache-Control, Expires and ETag policy for anonymous GET responses.

use axum::{
    body::{Body, HttpBody, to_bytes},
    extract::State,
    http::{
        HeaderMap, HeaderValue, Method, Request, StatusCode,
        header::{
            CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, EXPIRES, IF_NONE_MATCH,
            SET_COOKIE, VARY,
        },
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use md5::{Digest, Md5};
use time::{Duration, OffsetDateTime};

use crate::{application::error::ErrorReport, util::http_date};

use super::middleware::Viewer;

pub const HTML_MAX_AGE: i64 = 300;
pub const JSON_MAX_AGE: i64 = 600;
const ASSET_MAX_AGE: i64 = 31_536_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub max_age: i64,
    pub immutable: bool,
    pub etag: bool,
}

impl CachePolicy {
    /// Policy for a response `Content-Type`, or `None` to leave it untouched.
    pub fn for_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "text/html" => Some(Self {
                max_age: HTML_MAX_AGE,
                immutable: false,
                etag: true,
            }),
            "application/json" => Some(Self {
                max_age: JSON_MAX_AGE,
                immutable: false,
                etag: false,
            }),
            "text/css" | "application/javascript" | "text/javascript" => Some(Self::asset()),
            image if image.starts_with("image/") => Some(Self::asset()),
            _ => None,
        }
    }

    fn asset() -> Self {
        Self {
            max_age: ASSET_MAX_AGE,
            immutable: true,
            etag: false,
        }
    }

    pub fn cache_control(&self) -> String {
        if self.immutable {
            format!("public, max-age={}, immutable", self.max_age)
        } else {
            format!("public, max-age={}", self.max_age)
        }
    }

    fn apply(&self, headers: &mut HeaderMap, now: OffsetDateTime) {
        if let Ok(value) = HeaderValue::from_str(&self.cache_control()) {
            headers.insert(CACHE_CONTROL, value);
        }
        let expires = http_date::format(now + Duration::seconds(self.max_age));
        if let Ok(value) = HeaderValue::from_str(&expires) {
            headers.insert(EXPIRES, value);
        }
        if self.etag {
            headers.insert(VARY, HeaderValue::from_static("Accept-Encoding"));
        }
    }
}

#[derive(Clone, Copy)]
pub struct CacheHeaderState {
    pub max_body_bytes: usize,
}

pub fn body_etag(body: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Md5::digest(body)))
}

/// A response the origin marked as personal: `private` or `no-store`, or one
/// that sets a cookie.
pub fn is_personalized(headers: &HeaderMap) -> bool {
    if headers.contains_key(SET_COOKIE) {
        return true;
    }
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|directive| directive.trim().to_ascii_lowercase())
        .any(|directive| directive == "private" || directive == "no-store")
}

/// True when the body has a known length no larger than `limit`.
pub(super) fn fits_in_buffer(headers: &HeaderMap, body: &Body, limit: usize) -> bool {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    declared
        .or_else(|| body.size_hint().exact())
        .is_some_and(|len| len <= limit as u64)
}

fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}

pub async fn apply_cache_headers(
    State(state): State<CacheHeaderState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    const SOURCE: &str = "infra::http::headers::apply_cache_headers";

    let authenticated = request
        .extensions()
        .get::<Viewer>()
        .is_some_and(|viewer| viewer.is_authenticated());
    if request.method() != Method::GET || authenticated {
        return next.run(request).await;
    }

    let if_none_match = request
        .headers()
        .get(IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let response = next.run(request).await;
    if !response.status().is_success() || is_personalized(response.headers()) {
        return response;
    }

    let Some(policy) = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(CachePolicy::for_content_type)
    else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    policy.apply(&mut parts.headers, OffsetDateTime::now_utc());

    if !policy.etag {
        return Response::from_parts(parts, body);
    }

    // Streamed or oversized bodies keep their headers but get no ETag.
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

    let etag = body_etag(&bytes);
    if let Ok(value) = HeaderValue::from_str(&etag) {
        parts.headers.insert(ETAG, value);
    }

    if if_none_match.is_some_and(|candidates| etag_matches(&candidates, &etag)) {
        parts.status = StatusCode::NOT_MODIFIED;
        parts.headers.remove(CONTENT_LENGTH);
        parts.headers.remove(CONTENT_TYPE);
        return Response::from_parts(parts, Body::empty());
    }

    Response::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn policies_by_content_type() {
        let html = CachePolicy::for_content_type("text/html; charset=UTF-8").expect("html");
        assert_eq!(html.cache_control(), "public, max-age=300");
        assert!(html.etag);

        let json = CachePolicy::for_content_type("application/json").expect("json");
        assert_eq!(json.cache_control(), "public, max-age=600");
        assert!(!json.etag);

        for asset in ["image/webp", "text/css", "application/javascript", "text/javascript"] {
            let policy = CachePolicy::for_content_type(asset).expect(asset);
            assert_eq!(policy.cache_control(), "public, max-age=31536000, immutable");
        }

        assert_eq!(CachePolicy::for_content_type("application/xml"), None);
        assert_eq!(CachePolicy::for_content_type("text/plain"), None);
    }

    #[test]
    fn etag_is_quoted_md5_hex() {
        assert_eq!(body_etag(b""), "\"d41d8cd98f00b204e9800998ecf8427e\"");
        assert_ne!(body_etag(b"<p>a</p>"), body_etag(b"<p>b</p>"));
    }

    #[test]
    fn if_none_match_accepts_lists_and_weak_tags() {
        let etag = "\"abc\"";
        assert!(etag_matches("\"abc\"", etag));
        assert!(etag_matches("\"x\", W/\"abc\"", etag));
        assert!(etag_matches("*", etag));
        assert!(!etag_matches("\"abd\"", etag));
    }

    #[test]
    fn personalized_responses_are_recognized() {
        let mut headers = HeaderMap::new();
        assert!(!is_personalized(&headers));

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, Private"));
        assert!(is_personalized(&headers));

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        assert!(is_personalized(&headers));

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=60"));
        assert!(!is_personalized(&headers));

        headers.insert(SET_COOKIE, HeaderValue::from_static("laravel_session=abc; HttpOnly"));
        assert!(is_personalized(&headers));
    }

    #[test]
    fn only_bounded_bodies_are_buffered() {
        let empty = HeaderMap::new();
        assert!(fits_in_buffer(&empty, &Body::from("0123456789"), 10));
        assert!(!fits_in_buffer(&empty, &Body::from("0123456789"), 9));

        let mut declared = HeaderMap::new();
        declared.insert(CONTENT_LENGTH, HeaderValue::from_static("4096"));
        assert!(!fits_in_buffer(&declared, &Body::empty(), 1024));
    }

    #[test]
    fn expires_follows_max_age() {
        let mut headers = HeaderMap::new();
        CachePolicy::for_content_type("application/json")
            .expect("json")
            .apply(&mut headers, datetime!(2024-01-01 00:00:00 UTC));
        assert_eq!(
            headers.get(EXPIRES).and_then(|v| v.to_str().ok()),
            Some("Mon, 01 Jan 2024 00:10:00 GMT")
        );
        assert!(headers.get(VARY).is_none());
    }
}
