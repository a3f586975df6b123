//! Offline cache engine for the site's front end.
//!
//! The engine mirrors a browser service worker: three named caches, a
//! lifecycle (`install`, `activate`), a routed `fetch` handler, an hourly
//! maintenance sweep, control messages and a background-sync replay queue.
//! The network and the wall clock are injected through [`Fetcher`] and
//! [`Clock`] so the engine can run against a live origin or in tests.

mod engine;
mod fetch;
mod message;
mod storage;
mod strategy;

use std::time::Duration;

use axum::http::{HeaderMap, Method, StatusCode, header};
use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use url::Url;

pub use engine::{
    BACKGROUND_SYNC_TAG, CacheEngine, InstallReport, LifecycleState, MaintenanceReport, Served,
    ServedFrom, SyncReport,
};
pub use fetch::ReqwestFetcher;
pub use message::ControlMessage;
pub use storage::{CacheStorage, SweepOutcome};
pub use strategy::{Route, Strategy, classify};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("network request failed: {0}")]
    Network(String),
    #[error("invalid control message: {0}")]
    Message(#[from] serde_json::Error),
    #[error("invalid asset url `{url}`: {source}")]
    AssetUrl {
        url: String,
        source: url::ParseError,
    },
}

impl From<reqwest::Error> for WorkerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Engine settings, read from the `[worker]` config section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub version: String,
    pub critical_assets: Vec<String>,
    pub static_assets: Vec<String>,
    /// Cross-origin hosts whose GETs are routed like same-origin ones.
    pub trusted_origins: Vec<String>,
    pub max_entries: usize,
    pub max_age_seconds: u64,
    pub maintenance_interval_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            critical_assets: ["/", "/manifest.json", "/css/app.css", "/js/app.js"]
                .map(String::from)
                .to_vec(),
            static_assets: [
                "/images/logo.png",
                "/images/placeholder.jpg",
                "/fonts/inter-var.woff2",
            ]
            .map(String::from)
            .to_vec(),
            trusted_origins: [
                "https://cdn.jsdelivr.net",
                "https://fonts.googleapis.com",
                "https://fonts.gstatic.com",
                "https://image.tmdb.org",
            ]
            .map(String::from)
            .to_vec(),
            max_entries: 50,
            max_age_seconds: 24 * 60 * 60,
            maintenance_interval_seconds: 60 * 60,
        }
    }
}

impl WorkerConfig {
    pub fn critical_cache(&self) -> String {
        format!("critical-{}", self.version)
    }

    pub fn static_cache(&self) -> String {
        format!("static-{}", self.version)
    }

    pub fn runtime_cache(&self) -> String {
        format!("runtime-{}", self.version)
    }

    pub fn known_caches(&self) -> [String; 3] {
        [
            self.critical_cache(),
            self.static_cache(),
            self.runtime_cache(),
        ]
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_seconds)
    }
}

/// A request as seen by the fetch handler.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub method: Method,
    pub url: Url,
    /// Top-level document load.
    pub navigate: bool,
    pub body: Bytes,
}

impl WorkerRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            navigate: false,
            body: Bytes::new(),
        }
    }

    pub fn navigation(url: Url) -> Self {
        Self {
            navigate: true,
            ..Self::get(url)
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WorkerResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Generic fallback when neither the cache nor the network can answer.
    pub fn offline() -> Self {
        let mut response = Self::new(StatusCode::SERVICE_UNAVAILABLE, "Offline");
        response.headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("text/plain"),
        );
        response
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &WorkerRequest) -> Result<WorkerResponse, WorkerError>;
}
