use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use axum::http::{Method, header::CACHE_CONTROL};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::util::lock::{mutex_lock, rw_read, rw_write};

use super::{
    CacheStorage, Clock, ControlMessage, Fetcher, Route, Strategy, WorkerConfig, WorkerError,
    WorkerRequest, WorkerResponse, classify,
};

pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

const TARGET: &str = "reelhouse::worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    Cache,
    Network,
    Offline,
}

#[derive(Debug)]
pub struct Served {
    pub response: WorkerResponse,
    pub from: ServedFrom,
    pub route: Route,
    /// Background refresh started by stale-while-revalidate.
    pub revalidation: Option<JoinHandle<()>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InstallReport {
    pub critical: usize,
    pub static_assets: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub caches: usize,
    pub expired: usize,
    pub trimmed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub replayed: usize,
    pub requeued: usize,
}

pub struct CacheEngine {
    config: WorkerConfig,
    origin: Url,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    storage: Arc<CacheStorage>,
    state: RwLock<LifecycleState>,
    clients_claimed: AtomicBool,
    deferred: Mutex<VecDeque<WorkerRequest>>,
}

impl CacheEngine {
    pub fn new(
        config: WorkerConfig,
        origin: Url,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            origin,
            fetcher,
            clock,
            storage: Arc::new(CacheStorage::new()),
            state: RwLock::new(LifecycleState::Parsed),
            clients_claimed: AtomicBool::new(false),
            deferred: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn state(&self) -> LifecycleState {
        *rw_read(&self.state, TARGET, "state")
    }

    pub fn clients_claimed(&self) -> bool {
        self.clients_claimed.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: LifecycleState) {
        let mut state = rw_write(&self.state, TARGET, "set_state");
        let previous = *state;
        debug!(target = TARGET, from = ?previous, to = ?next, "lifecycle transition");
        *state = next;
    }

    /// Fills the critical and static caches, then activates without waiting.
    pub async fn install(&self) -> InstallReport {
        self.set_state(LifecycleState::Installing);

        let (critical, critical_failed) = self
            .precache(&self.config.critical_cache(), &self.config.critical_assets)
            .await;
        let (static_assets, static_failed) = self
            .precache(&self.config.static_cache(), &self.config.static_assets)
            .await;

        self.set_state(LifecycleState::Installed);
        self.skip_waiting();

        let report = InstallReport {
            critical,
            static_assets,
            failed: critical_failed + static_failed,
        };
        info!(
            target = TARGET,
            critical = report.critical,
            static_assets = report.static_assets,
            failed = report.failed,
            "install complete"
        );
        report
    }

    async fn precache(&self, cache: &str, assets: &[String]) -> (usize, usize) {
        let mut stored = 0;
        let mut failed = 0;

        for asset in assets {
            let url = match self.origin.join(asset) {
                Ok(url) => url,
                Err(source) => {
                    let err = WorkerError::AssetUrl {
                        url: asset.clone(),
                        source,
                    };
                    warn!(target = TARGET, cache, error = %err, "skipping asset");
                    failed += 1;
                    continue;
                }
            };

            match self.fetcher.fetch(&WorkerRequest::get(url.clone())).await {
                Ok(response) if response.is_success() => {
                    self.storage
                        .put(cache, &cache_key(&url), response, self.clock.now());
                    stored += 1;
                }
                Ok(response) => {
                    warn!(
                        target = TARGET,
                        cache,
                        url = %url,
                        status = response.status.as_u16(),
                        "asset not cached"
                    );
                    failed += 1;
                }
                Err(err) => {
                    warn!(target = TARGET, cache, url = %url, error = %err, "asset not cached");
                    failed += 1;
                }
            }
        }

        (stored, failed)
    }

    pub fn skip_waiting(&self) {
        let mut state = rw_write(&self.state, TARGET, "skip_waiting");
        if matches!(*state, LifecycleState::Installed) {
            *state = LifecycleState::Activating;
        }
    }

    /// Deletes caches from other versions and takes control of clients.
    pub fn activate(&self) -> Vec<String> {
        let removed = self.storage.retain(&self.config.known_caches());
        for name in &removed {
            info!(target = TARGET, cache = %name, "deleted stale cache");
        }
        self.clients_claimed.store(true, Ordering::SeqCst);
        self.set_state(LifecycleState::Activated);
        removed
    }

    pub async fn fetch(&self, request: WorkerRequest) -> Result<Served, WorkerError> {
        let route = classify(&request, &self.origin, &self.config);
        let (Some(strategy), Some(cache)) = (route.strategy(), route.cache_name(&self.config))
        else {
            return self.passthrough(request).await;
        };

        let (response, from, revalidation) = match strategy {
            Strategy::CacheFirst => {
                let (response, from) = self.cache_first(&cache, &request).await;
                (response, from, None)
            }
            Strategy::NetworkFirst => {
                let (response, from) = self.network_first(&cache, &request).await;
                (response, from, None)
            }
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(&cache, &request).await,
        };

        Ok(Served {
            response,
            from,
            route,
            revalidation,
        })
    }

    async fn passthrough(&self, request: WorkerRequest) -> Result<Served, WorkerError> {
        match self.fetcher.fetch(&request).await {
            Ok(response) => Ok(Served {
                response,
                from: ServedFrom::Network,
                route: Route::Passthrough,
                revalidation: None,
            }),
            Err(err) => {
                if request.method != Method::GET && request.url.origin() == self.origin.origin() {
                    debug!(target = TARGET, url = %request.url, "deferring failed request");
                    self.defer(request);
                }
                Err(err)
            }
        }
    }

    async fn cache_first(&self, cache: &str, request: &WorkerRequest) -> (WorkerResponse, ServedFrom) {
        let key = cache_key(&request.url);
        if let Some(hit) = self.storage.lookup(cache, &key) {
            return (hit, ServedFrom::Cache);
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store(cache, &key, &response);
                (response, ServedFrom::Network)
            }
            Err(err) => {
                debug!(target = TARGET, url = %request.url, error = %err, "serving offline fallback");
                (WorkerResponse::offline(), ServedFrom::Offline)
            }
        }
    }

    async fn network_first(
        &self,
        cache: &str,
        request: &WorkerRequest,
    ) -> (WorkerResponse, ServedFrom) {
        let key = cache_key(&request.url);
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store(cache, &key, &response);
                (response, ServedFrom::Network)
            }
            Err(err) => {
                debug!(target = TARGET, url = %request.url, error = %err, "network failed");
                match self.storage.lookup(cache, &key) {
                    Some(hit) => (hit, ServedFrom::Cache),
                    None => (WorkerResponse::offline(), ServedFrom::Offline),
                }
            }
        }
    }

    async fn stale_while_revalidate(
        &self,
        cache: &str,
        request: &WorkerRequest,
    ) -> (WorkerResponse, ServedFrom, Option<JoinHandle<()>>) {
        let key = cache_key(&request.url);
        if let Some(hit) = self.storage.lookup(cache, &key) {
            let refresh = self.spawn_revalidation(cache.to_string(), key, request.clone());
            return (hit, ServedFrom::Cache, Some(refresh));
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store(cache, &key, &response);
                (response, ServedFrom::Network, None)
            }
            Err(err) => {
                debug!(target = TARGET, url = %request.url, error = %err, "serving offline fallback");
                (WorkerResponse::offline(), ServedFrom::Offline, None)
            }
        }
    }

    fn spawn_revalidation(&self, cache: String, key: String, request: WorkerRequest) -> JoinHandle<()> {
        let fetcher = Arc::clone(&self.fetcher);
        let storage = Arc::clone(&self.storage);
        let clock = Arc::clone(&self.clock);
        tokio::spawn(async move {
            match fetcher.fetch(&request).await {
                Ok(response) if is_storable(&response) => {
                    storage.put(&cache, &key, response, clock.now());
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(target = TARGET, url = %request.url, error = %err, "revalidation failed");
                }
            }
        })
    }

    fn store(&self, cache: &str, key: &str, response: &WorkerResponse) {
        if is_storable(response) {
            self.storage
                .put(cache, key, response.clone(), self.clock.now());
        }
    }

    /// Expires and trims every cache once.
    pub fn maintenance(&self) -> MaintenanceReport {
        let now = self.clock.now();
        let mut report = MaintenanceReport::default();

        for name in self.storage.cache_names() {
            let outcome =
                self.storage
                    .sweep(&name, now, self.config.max_age(), self.config.max_entries);
            report.caches += 1;
            report.expired += outcome.expired;
            report.trimmed += outcome.trimmed;
        }

        if report.expired + report.trimmed > 0 {
            info!(
                target = TARGET,
                caches = report.caches,
                expired = report.expired,
                trimmed = report.trimmed,
                "cache maintenance"
            );
        }
        report
    }

    /// Runs [`CacheEngine::maintenance`] on the configured interval until the
    /// handle is aborted.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let every = self.config.maintenance_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await; // Skip the first immediate tick
            loop {
                interval.tick().await;
                engine.maintenance();
            }
        })
    }

    pub fn handle_message(&self, message: ControlMessage) {
        match message {
            ControlMessage::SkipWaiting => self.skip_waiting(),
            ControlMessage::ClearCache => {
                let cleared = self.storage.clear();
                info!(target = TARGET, cleared, "caches cleared");
            }
        }
    }

    pub fn handle_raw_message(&self, raw: &str) -> Result<(), WorkerError> {
        self.handle_message(ControlMessage::parse(raw)?);
        Ok(())
    }

    pub fn defer(&self, request: WorkerRequest) {
        mutex_lock(&self.deferred, TARGET, "defer").push_back(request);
    }

    pub fn deferred_len(&self) -> usize {
        mutex_lock(&self.deferred, TARGET, "deferred_len").len()
    }

    /// Replays deferred requests for the `background-sync` tag. Requests that
    /// fail again go back on the queue.
    pub async fn sync(&self, tag: &str) -> SyncReport {
        if tag != BACKGROUND_SYNC_TAG {
            debug!(target = TARGET, tag, "ignoring sync tag");
            return SyncReport::default();
        }

        let pending: Vec<WorkerRequest> = mutex_lock(&self.deferred, TARGET, "sync")
            .drain(..)
            .collect();

        let mut report = SyncReport::default();
        for request in pending {
            match self.fetcher.fetch(&request).await {
                Ok(_) => report.replayed += 1,
                Err(err) => {
                    debug!(target = TARGET, url = %request.url, error = %err, "replay failed");
                    report.requeued += 1;
                    self.defer(request);
                }
            }
        }
        report
    }
}

fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// Successful responses not marked `no-store` or `private`.
fn is_storable(response: &WorkerResponse) -> bool {
    if !response.is_success() {
        return false;
    }
    !response
        .headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|directive| {
            directive.eq_ignore_ascii_case("no-store") || directive.eq_ignore_ascii_case("private")
        })
}
