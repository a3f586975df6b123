use axum::http::Method;
use url::{Origin, Url};

use super::{WorkerConfig, WorkerRequest};

const STATIC_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "avif", "svg", "ico", "woff", "woff2", "ttf", "otf",
    "eot",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

/// Where the fetch handler sends a request, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Critical,
    Static,
    Api,
    Navigation,
    Other,
    /// Not handled: straight to the network.
    Passthrough,
}

impl Route {
    pub fn strategy(self) -> Option<Strategy> {
        match self {
            Route::Critical | Route::Static => Some(Strategy::CacheFirst),
            Route::Api | Route::Other => Some(Strategy::NetworkFirst),
            Route::Navigation => Some(Strategy::StaleWhileRevalidate),
            Route::Passthrough => None,
        }
    }

    pub fn cache_name(self, config: &WorkerConfig) -> Option<String> {
        match self {
            Route::Critical => Some(config.critical_cache()),
            Route::Static => Some(config.static_cache()),
            Route::Api | Route::Navigation | Route::Other => Some(config.runtime_cache()),
            Route::Passthrough => None,
        }
    }
}

pub fn classify(request: &WorkerRequest, origin: &Url, config: &WorkerConfig) -> Route {
    if request.method != Method::GET {
        return Route::Passthrough;
    }

    let same_origin = request.url.origin() == origin.origin();
    if !same_origin && !is_trusted(&request.url.origin(), config) {
        return Route::Passthrough;
    }

    let path = request.url.path();
    if same_origin && is_critical(path) {
        Route::Critical
    } else if is_static(path) {
        Route::Static
    } else if same_origin && path.starts_with("/api/") {
        Route::Api
    } else if request.navigate {
        Route::Navigation
    } else {
        Route::Other
    }
}

fn is_trusted(origin: &Origin, config: &WorkerConfig) -> bool {
    config
        .trusted_origins
        .iter()
        .filter_map(|trusted| Url::parse(trusted).ok())
        .any(|trusted| &trusted.origin() == origin)
}

fn is_critical(path: &str) -> bool {
    path == "/" || path == "/manifest.json" || path.starts_with("/css/") || path.starts_with("/js/app")
}

fn is_static(path: &str) -> bool {
    if path.contains("/images/") || path.contains("/fonts/") {
        return true;
    }
    path.rsplit_once('.').is_some_and(|(_, ext)| {
        STATIC_EXTENSIONS
            .iter()
            .any(|known| ext.eq_ignore_ascii_case(known))
    })
}
