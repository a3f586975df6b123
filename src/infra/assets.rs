//! Static file serving from the site's public directory.

use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use mime_guess::{Mime, mime};

use crate::application::error::ErrorReport;

const SOURCE: &str = "infra::assets::serve_public_file";

/// Resolve a request path below `root`. Traversal and directory requests are rejected.
pub fn resolve_public_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut candidate = request_path.trim_start_matches('/').to_string();
    if candidate.is_empty() || candidate.ends_with('/') {
        candidate.push_str("index.html");
    }

    let relative = Path::new(&candidate);
    if relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return None;
    }

    Some(root.join(relative))
}

/// `Ok(None)` when nothing is stored at the path.
pub async fn read_public_file(root: &Path, request_path: &str) -> Result<Option<Response>, Response> {
    let Some(path) = resolve_public_path(root, request_path) else {
        return Ok(None);
    };

    match tokio::fs::read(&path).await {
        Ok(contents) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            Ok(Some(build_response(Bytes::from(contents), mime)))
        }
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::IsADirectory) => {
            Ok(None)
        }
        Err(err) => {
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            ErrorReport::from_error(SOURCE, StatusCode::INTERNAL_SERVER_ERROR, &err)
                .attach(&mut response);
            Err(response)
        }
    }
}

fn build_response(bytes: Bytes, guessed: Mime) -> Response {
    let len = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let content_type =
        if guessed.type_() == mime::TEXT && guessed.get_param(mime::CHARSET).is_none() {
            format!("{guessed}; charset=utf-8")
        } else {
            guessed.to_string()
        };
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_is_rejected() {
        let root = Path::new("/srv/public");
        assert_eq!(resolve_public_path(root, "/../etc/passwd"), None);
        assert_eq!(resolve_public_path(root, "/css/../../x"), None);
        assert_eq!(
            resolve_public_path(root, "/css/app.css"),
            Some(PathBuf::from("/srv/public/css/app.css"))
        );
        assert_eq!(
            resolve_public_path(root, "/"),
            Some(PathBuf::from("/srv/public/index.html"))
        );
    }

    #[tokio::test]
    async fn serves_files_with_guessed_type() {
        let dir = tempfile::tempdir().expect("tempdir");
        tokio::fs::write(dir.path().join("app.css"), b"body{}")
            .await
            .expect("write");

        let response = read_public_file(dir.path(), "/app.css")
            .await
            .expect("readable")
            .expect("present");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("text/css; charset=utf-8")
        );

        assert!(
            read_public_file(dir.path(), "/missing.js")
                .await
                .expect("readable")
                .is_none()
        );
    }
}
