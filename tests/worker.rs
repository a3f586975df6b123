//! Offline cache engine driven through its public API.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use axum::http::StatusCode;
use reelhouse::worker::{
    CacheEngine, ControlMessage, Fetcher, LifecycleState, Route, ServedFrom, SystemClock,
    WorkerConfig, WorkerError, WorkerRequest, WorkerResponse,
};
use url::Url;

const ORIGIN: &str = "https://watch.example.com";

#[derive(Default)]
struct Origin {
    pages: Mutex<HashMap<String, &'static str>>,
    down: AtomicBool,
    hits: AtomicUsize,
}

impl Origin {
    fn page(&self, path: &str, body: &'static str) {
        self.pages
            .lock()
            .expect("pages lock")
            .insert(format!("{ORIGIN}{path}"), body);
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for Origin {
    async fn fetch(&self, request: &WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(WorkerError::Network("connection refused".to_string()));
        }
        let pages = self.pages.lock().expect("pages lock");
        Ok(match pages.get(request.url.as_str()) {
            Some(body) => WorkerResponse::new(StatusCode::OK, *body),
            None => WorkerResponse::new(StatusCode::NOT_FOUND, "missing"),
        })
    }
}

fn url(path: &str) -> Url {
    Url::parse(ORIGIN).and_then(|base| base.join(path)).expect("url")
}

fn config(version: &str) -> WorkerConfig {
    WorkerConfig {
        version: version.to_string(),
        critical_assets: vec!["/".into(), "/css/app.css".into()],
        static_assets: vec!["/images/logo.png".into()],
        ..WorkerConfig::default()
    }
}

fn origin() -> Arc<Origin> {
    let origin = Arc::new(Origin::default());
    origin.page("/", "<html>home</html>");
    origin.page("/css/app.css", "body{}");
    origin.page("/images/logo.png", "png");
    origin.page("/movie/heat", "<html>heat</html>");
    origin
}

#[tokio::test]
async fn installed_worker_serves_the_shell_offline() {
    let origin = origin();
    let engine = CacheEngine::new(config("v1"), url("/"), origin.clone(), Arc::new(SystemClock));

    let install = engine.install().await;
    assert_eq!((install.critical, install.static_assets, install.failed), (2, 1, 0));
    engine.activate();
    assert_eq!(engine.state(), LifecycleState::Activated);
    assert!(engine.clients_claimed());

    origin.set_down(true);
    let hits_before = origin.hits.load(Ordering::SeqCst);

    let home = engine.fetch(WorkerRequest::navigation(url("/"))).await.expect("home");
    assert_eq!(home.route, Route::Critical);
    assert_eq!(home.from, ServedFrom::Cache);
    assert_eq!(home.response.body.as_ref(), b"<html>home</html>");

    let logo = engine
        .fetch(WorkerRequest::get(url("/images/logo.png")))
        .await
        .expect("logo");
    assert_eq!(logo.from, ServedFrom::Cache);
    assert_eq!(origin.hits.load(Ordering::SeqCst), hits_before);

    let unknown = engine
        .fetch(WorkerRequest::navigation(url("/movie/heat")))
        .await
        .expect("fallback");
    assert_eq!(unknown.from, ServedFrom::Offline);
    assert_eq!(unknown.response.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn new_version_drops_previous_caches() {
    let engine = CacheEngine::new(config("v2"), url("/"), origin(), Arc::new(SystemClock));
    engine.storage().put(
        "critical-v1",
        &format!("{ORIGIN}/"),
        WorkerResponse::new(StatusCode::OK, "old shell"),
        time::OffsetDateTime::now_utc(),
    );

    engine.install().await;
    let removed = engine.activate();

    assert_eq!(removed, vec!["critical-v1".to_string()]);
    assert_eq!(
        engine.storage().cache_names(),
        vec!["critical-v2".to_string(), "static-v2".to_string()]
    );
}

#[tokio::test]
async fn clear_cache_then_refill_from_network() {
    let origin = origin();
    let engine = CacheEngine::new(config("v1"), url("/"), origin.clone(), Arc::new(SystemClock));
    engine.install().await;
    engine.activate();

    engine.handle_message(ControlMessage::ClearCache);
    assert!(engine.storage().cache_names().is_empty());

    let home = engine.fetch(WorkerRequest::get(url("/"))).await.expect("home");
    assert_eq!(home.from, ServedFrom::Network);
    assert_eq!(engine.storage().len("critical-v1"), 1);
}

#[tokio::test]
async fn unknown_control_message_is_rejected() {
    let engine = CacheEngine::new(config("v1"), url("/"), origin(), Arc::new(SystemClock));
    assert!(matches!(
        engine.handle_raw_message(r#"{"type":"PURGE_EVERYTHING"}"#),
        Err(WorkerError::Message(_))
    ));
}
