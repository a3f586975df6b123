use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Request, header},
    middleware::Next,
    response::Response,
};

pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
    script-src 'self' 'unsafe-inline' 'unsafe-eval' https://www.googletagmanager.com https://cdn.jsdelivr.net; \
    style-src 'self' 'unsafe-inline' https://fonts.googleapis.com https://cdn.jsdelivr.net; \
    font-src 'self' data: https://fonts.gstatic.com; \
    img-src 'self' data: blob: https:; \
    media-src 'self' blob: https:; \
    frame-src 'self' https:; \
    connect-src 'self' https:";

const HSTS: &str = "max-age=31536000; includeSubDomains";
const X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

#[derive(Clone, Copy)]
pub struct SecurityState {
    pub trust_forwarded_proto: bool,
}

impl SecurityState {
    fn arrived_over_tls(&self, request: &Request<Body>) -> bool {
        if request.uri().scheme_str() == Some("https") {
            return true;
        }
        self.trust_forwarded_proto
            && request
                .headers()
                .get(X_FORWARDED_PROTO)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
    }
}

pub async fn apply_security_headers(
    State(state): State<SecurityState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let secure = state.arrived_over_tls(&request);
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );
    if secure {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static(HSTS),
        );
    }
    headers.remove(X_POWERED_BY);
    headers.remove(header::SERVER);

    response
}
