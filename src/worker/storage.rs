use std::{collections::HashMap, sync::RwLock, time::Duration};

use axum::http::header::DATE;
use lru::LruCache;
use time::OffsetDateTime;

use crate::util::{
    http_date,
    lock::{rw_read, rw_write},
};

use super::WorkerResponse;

const TARGET: &str = "reelhouse::worker::storage";

#[derive(Debug, Clone)]
struct CachedEntry {
    response: WorkerResponse,
    stored_at: OffsetDateTime,
}

impl CachedEntry {
    /// The response's own `Date` header wins over the time it was stored.
    fn dated(&self) -> OffsetDateTime {
        self.response
            .headers
            .get(DATE)
            .and_then(|value| value.to_str().ok())
            .and_then(http_date::parse)
            .unwrap_or(self.stored_at)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    pub expired: usize,
    pub trimmed: usize,
}

/// Named caches keyed by request URL.
///
/// Each cache keeps insertion order: lookups never promote an entry, so the
/// least recent end is always the oldest write.
#[derive(Default)]
pub struct CacheStorage {
    caches: RwLock<HashMap<String, LruCache<String, CachedEntry>>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, cache: &str, url: &str) -> Option<WorkerResponse> {
        let caches = rw_read(&self.caches, TARGET, "lookup");
        caches
            .get(cache)
            .and_then(|entries| entries.peek(url))
            .map(|entry| entry.response.clone())
    }

    pub fn put(&self, cache: &str, url: &str, response: WorkerResponse, stored_at: OffsetDateTime) {
        let mut caches = rw_write(&self.caches, TARGET, "put");
        caches
            .entry(cache.to_string())
            .or_insert_with(LruCache::unbounded)
            .put(
                url.to_string(),
                CachedEntry {
                    response,
                    stored_at,
                },
            );
    }

    pub fn cache_names(&self) -> Vec<String> {
        let caches = rw_read(&self.caches, TARGET, "cache_names");
        let mut names: Vec<String> = caches.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self, cache: &str) -> usize {
        let caches = rw_read(&self.caches, TARGET, "len");
        caches.get(cache).map_or(0, LruCache::len)
    }

    pub fn contains(&self, cache: &str, url: &str) -> bool {
        let caches = rw_read(&self.caches, TARGET, "contains");
        caches.get(cache).is_some_and(|entries| entries.contains(url))
    }

    pub fn delete(&self, cache: &str) -> bool {
        rw_write(&self.caches, TARGET, "delete")
            .remove(cache)
            .is_some()
    }

    /// Drops every cache, returning how many existed.
    pub fn clear(&self) -> usize {
        let mut caches = rw_write(&self.caches, TARGET, "clear");
        let count = caches.len();
        caches.clear();
        count
    }

    /// Deletes every cache not named in `keep`, returning the deleted names.
    pub fn retain(&self, keep: &[String]) -> Vec<String> {
        let mut caches = rw_write(&self.caches, TARGET, "retain");
        let mut removed: Vec<String> = caches
            .keys()
            .filter(|name| !keep.contains(name))
            .cloned()
            .collect();
        removed.sort();
        for name in &removed {
            caches.remove(name);
        }
        removed
    }

    /// Removes entries older than `max_age`, then the oldest writes until at
    /// most `max_entries` remain.
    pub fn sweep(
        &self,
        cache: &str,
        now: OffsetDateTime,
        max_age: Duration,
        max_entries: usize,
    ) -> SweepOutcome {
        let mut caches = rw_write(&self.caches, TARGET, "sweep");
        let Some(entries) = caches.get_mut(cache) else {
            return SweepOutcome::default();
        };

        let max_age = time::Duration::try_from(max_age).unwrap_or(time::Duration::MAX);
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| now - entry.dated() > max_age)
            .map(|(url, _)| url.clone())
            .collect();
        for url in &stale {
            entries.pop(url);
        }

        let mut trimmed = 0;
        while entries.len() > max_entries {
            if entries.pop_lru().is_none() {
                break;
            }
            trimmed += 1;
        }

        SweepOutcome {
            expired: stale.len(),
            trimmed,
        }
    }
}
