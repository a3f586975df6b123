//! Key-value cache storage.
//!
//! Every write carries an explicit TTL. Expired entries read as misses and are
//! dropped on access; capacity pressure evicts the least recently used key.

use std::{
    future::Future,
    sync::RwLock,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use tracing::debug;

use super::config::CacheConfig;
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "reelhouse::cache::store";

/// Injected process cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live value.
    async fn get(&self, key: &str) -> Option<Bytes>;

    /// Store a value valid for `ttl`.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration);

    /// Remove one key, returning whether it was present.
    async fn forget(&self, key: &str) -> bool;

    /// Remove every key.
    async fn flush(&self);
}

/// Return the cached value for `key`, or run `produce`, store its output for `ttl`, and return it.
///
/// Concurrent misses on the same key each run `produce`.
pub async fn remember<F, Fut, E>(
    store: &dyn CacheStore,
    key: &str,
    ttl: Duration,
    produce: F,
) -> Result<Bytes, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Bytes, E>>,
{
    if let Some(hit) = store.get(key).await {
        return Ok(hit);
    }

    let value = produce().await?;
    store.set(key, value.clone(), ttl).await;
    Ok(value)
}

struct Entry {
    value: Bytes,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-memory LRU store with per-entry expiry.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, Entry>>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.capacity)),
        }
    }

    /// Number of keys currently held, expired or not.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let expired = match entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => {
                counter!("reelhouse_cache_hit_total").increment(1);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            debug!(key, "dropped expired cache entry");
        }
        counter!("reelhouse_cache_miss_total").increment(1);
        None
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) {
        let entry = Entry {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };
        let evicted = rw_write(&self.entries, SOURCE, "set").push(key.to_string(), entry);
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            counter!("reelhouse_cache_evict_total").increment(1);
        }
    }

    async fn forget(&self, key: &str) -> bool {
        rw_write(&self.entries, SOURCE, "forget").pop(key).is_some()
    }

    async fn flush(&self) {
        rw_write(&self.entries, SOURCE, "flush").clear();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        num::NonZeroUsize,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn store_with_capacity(capacity: usize) -> MemoryStore {
        MemoryStore::new(&CacheConfig {
            capacity: NonZeroUsize::new(capacity).expect("non-zero capacity"),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let store = store_with_capacity(4);
        store
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await;
        assert_eq!(store.get("k").await, Some(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn expired_entries_read_as_misses() {
        let store = store_with_capacity(4);
        store
            .set("k", Bytes::from_static(b"v"), Duration::from_millis(5))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get("k").await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unrepresentable_ttl_never_expires() {
        let store = store_with_capacity(4);
        store
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(u64::MAX / 2))
            .await;
        store.set("max", Bytes::from_static(b"m"), Duration::MAX).await;

        assert_eq!(store.get("k").await, Some(Bytes::from_static(b"v")));
        assert_eq!(store.get("max").await, Some(Bytes::from_static(b"m")));
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let store = store_with_capacity(2);
        let ttl = Duration::from_secs(60);
        store.set("a", Bytes::from_static(b"1"), ttl).await;
        store.set("b", Bytes::from_static(b"2"), ttl).await;
        assert!(store.get("a").await.is_some());
        store.set("c", Bytes::from_static(b"3"), ttl).await;

        assert!(store.get("b").await.is_none());
        assert!(store.get("a").await.is_some());
        assert!(store.get("c").await.is_some());
    }

    #[tokio::test]
    async fn forget_and_flush() {
        let store = store_with_capacity(4);
        let ttl = Duration::from_secs(60);
        store.set("a", Bytes::from_static(b"1"), ttl).await;
        store.set("b", Bytes::from_static(b"2"), ttl).await;

        assert!(store.forget("a").await);
        assert!(!store.forget("a").await);
        store.flush().await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn remember_runs_producer_once_until_flush() {
        let store = store_with_capacity(4);
        let calls = AtomicUsize::new(0);
        let ttl = Duration::from_secs(60);

        for _ in 0..3 {
            let value = remember(&store, "key", ttl, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(Bytes::from_static(b"fresh"))
            })
            .await
            .expect("producer succeeds");
            assert_eq!(value, Bytes::from_static(b"fresh"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store.flush().await;
        remember(&store, "key", ttl, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(Bytes::from_static(b"fresh"))
        })
        .await
        .expect("producer succeeds");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn remember_does_not_cache_errors() {
        let store = store_with_capacity(4);
        let result = remember(&store, "key", Duration::from_secs(60), || async {
            Err::<Bytes, _>(std::io::Error::other("boom"))
        })
        .await;

        assert!(result.is_err());
        assert!(store.get("key").await.is_none());
    }
}
