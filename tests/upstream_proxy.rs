//! Requests that fall through to the upstream application server, with the
//! full public middleware stack in front.

mod support;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::DefaultBodyLimit,
    http::{HeaderMap, Method, Request, StatusCode, header},
    response::{Html, IntoResponse},
    routing::{get, post},
};
use reelhouse::infra::http::body_etag;
use tempfile::TempDir;

use support::{
    MAX_BODY_BYTES, body_bytes, body_text, get as get_request, proxy_router, send, spawn_upstream,
};

const TRAILER_BYTES: usize = 3 * 1024 * 1024;

async fn home(headers: HeaderMap) -> Html<String> {
    let encoding = headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("none")
        .to_string();
    Html(format!(
        "<!DOCTYPE html><html><head><title>Home</title></head><body>\n  <!-- hero -->\n  \
         <img src=\"poster.jpg\"><p>encoding:{encoding}</p></body></html>"
    ))
}

async fn account() -> impl IntoResponse {
    (
        [
            (header::CACHE_CONTROL, "no-cache, private"),
            (header::SET_COOKIE, "laravel_session=s3cr3t; path=/; httponly"),
        ],
        Html("<html><head></head><body><p>Hello, Ana</p></body></html>"),
    )
}

async fn trailer() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "video/mp4")], vec![7u8; TRAILER_BYTES])
}

fn long_read_chunks() -> Vec<String> {
    (0..8)
        .map(|index| format!("<p>chapter {index}</p>{}", "  word".repeat(40 * 1024)))
        .collect()
}

async fn long_read() -> impl IntoResponse {
    let chunks = long_read_chunks()
        .into_iter()
        .map(|chunk| Ok::<_, std::io::Error>(Bytes::from(chunk)));
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        Body::from_stream(futures::stream::iter(chunks)),
    )
}

async fn upload(body: Bytes) -> String {
    body.len().to_string()
}

fn upstream_app() -> Router {
    Router::new()
        .route("/", get(home))
        .route("/account", get(account))
        .route("/trailer.mp4", get(trailer))
        .route("/long-read", get(long_read))
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::disable())
}

#[tokio::test]
async fn proxied_pages_are_optimized_and_cacheable() {
    let dir = TempDir::new().expect("tempdir");
    let router = proxy_router(dir.path(), spawn_upstream(upstream_app()).await);

    let request = Request::builder()
        .uri("/")
        .header(header::ACCEPT_ENCODING, "gzip, br")
        .body(Body::empty())
        .expect("request");
    let response = send(&router, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers().clone();
    assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=300");
    assert_eq!(headers["x-dns-prefetch-control"], "on");
    assert!(!headers.contains_key(header::CONTENT_ENCODING));

    let body = body_bytes(response).await;
    assert_eq!(headers[header::ETAG].to_str().expect("ascii"), body_etag(&body));

    let html = String::from_utf8(body.to_vec()).expect("utf-8");
    assert!(html.contains("encoding:none"), "{html}");
    assert!(html.contains("loading=\"lazy\""));
    assert!(!html.contains("hero"));
}

#[tokio::test]
async fn private_upstream_pages_keep_their_cache_control() {
    let dir = TempDir::new().expect("tempdir");
    let router = proxy_router(dir.path(), spawn_upstream(upstream_app()).await);

    let request = Request::builder()
        .uri("/account")
        .header(header::COOKIE, "XSRF-TOKEN=t; laravel_session=abc")
        .body(Body::empty())
        .expect("request");
    let response = send(&router, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, private");
    assert!(
        headers[header::SET_COOKIE]
            .to_str()
            .expect("ascii")
            .starts_with("laravel_session=s3cr3t")
    );
    assert!(!headers.contains_key(header::ETAG));
    assert!(!headers.contains_key(header::EXPIRES));
    assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
}

#[tokio::test]
async fn media_streams_through_unchanged() {
    let dir = TempDir::new().expect("tempdir");
    let router = proxy_router(dir.path(), spawn_upstream(upstream_app()).await);

    let response = send(&router, get_request("/trailer.mp4")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert!(!response.headers().contains_key(header::CACHE_CONTROL));

    let body = body_bytes(response).await;
    assert_eq!(body.len(), TRAILER_BYTES);
    assert!(body.iter().all(|byte| *byte == 7));
}

#[tokio::test]
async fn oversized_html_is_passed_through_without_etag() {
    let dir = TempDir::new().expect("tempdir");
    let router = proxy_router(dir.path(), spawn_upstream(upstream_app()).await);

    let response = send(&router, get_request("/long-read")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key(header::ETAG));
    assert!(!response.headers().contains_key("x-dns-prefetch-control"));

    let expected = long_read_chunks().concat();
    assert!(expected.len() > MAX_BODY_BYTES);
    assert_eq!(body_text(response).await, expected);
}

#[tokio::test]
async fn large_uploads_reach_the_upstream() {
    let dir = TempDir::new().expect("tempdir");
    let router = proxy_router(dir.path(), spawn_upstream(upstream_app()).await);

    let size = 3 * MAX_BODY_BYTES;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(vec![1u8; size]))
        .expect("request");
    let response = send(&router, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, size.to_string());
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let dir = TempDir::new().expect("tempdir");
    let upstream = url::Url::parse(&format!("http://{addr}/")).expect("url");
    let router = proxy_router(dir.path(), upstream);

    let response = send(&router, get_request("/movie/dune")).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.headers()[header::X_FRAME_OPTIONS], "DENY");
    assert!(!response.headers().contains_key(header::CACHE_CONTROL));
    assert_eq!(body_text(response).await, "Upstream unavailable");
}
