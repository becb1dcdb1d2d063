//! Response cache manager.

use super::key::Fingerprint;
use super::store::CacheStore;
use crate::{Error, ErrorContext, Result};
use lru::LruCache;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, warn};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Default entry lifetime.
    pub ttl: Duration,
    /// Entry-count capacity of both the memory layer and the durable store.
    pub max_entries: usize,
    /// Durable spool directory. `None` keeps the cache process-local.
    pub storage_location: Option<PathBuf>,
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_entries: 1000,
            storage_location: None,
            enabled: true,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn with_storage_location(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_location = Some(dir.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// A single cached result plus its access metadata.
///
/// The payload is immutable once created; only `last_accessed_at` and
/// `hit_count` mutate afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub fingerprint: String,
    pub payload: T,
    /// Unix millis.
    pub created_at: u64,
    /// Unix millis; 0 means no expiry.
    pub expires_at: u64,
    pub last_accessed_at: u64,
    pub hit_count: u64,
    /// Serialized payload size in bytes.
    pub size: usize,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self) -> bool {
        self.expires_at != 0 && now_millis() >= self.expires_at
    }
}

/// Process-wide cache counters. Monotonic; reset only on restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub entries_count: usize,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_requests as f64
        }
    }
}

struct AtomicStats {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    evictions: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn to_stats(&self, entries_count: usize) -> CacheStats {
        CacheStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            entries_count,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

type SharedResult<T> = Option<std::result::Result<T, Error>>;

/// Concurrency-safe response cache: an LRU memory layer over a durable
/// store, with in-flight coalescing so at most one computation runs per
/// fingerprint at any instant.
///
/// Durable-store failures degrade the cache to pass-through; they are
/// logged and never surfaced to callers.
pub struct ResponseCache<T> {
    config: CacheConfig,
    memory: Arc<Mutex<LruCache<String, CacheEntry<T>>>>,
    store: Arc<dyn CacheStore>,
    in_flight: Arc<Mutex<HashMap<String, watch::Receiver<SharedResult<T>>>>>,
    stats: Arc<AtomicStats>,
}

impl<T> ResponseCache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        let cap = NonZeroUsize::new(config.max_entries.max(1)).unwrap();
        Self {
            config,
            memory: Arc::new(Mutex::new(LruCache::new(cap))),
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(AtomicStats::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live entry. Records the request and a hit/miss in stats.
    pub async fn get(&self, key: &Fingerprint) -> Option<T> {
        if !self.config.enabled {
            return None;
        }
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);
        match self.lookup(key).await {
            Some(value) => {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => None,
        }
    }

    /// The central concurrency primitive.
    ///
    /// Returns `(value, cache_hit)`. A live entry returns immediately as a
    /// hit. If a computation for the key is already in flight the caller
    /// attaches to it and the shared outcome counts as a hit; otherwise this
    /// caller becomes the leader, the computation runs on its own task (so a
    /// caller abandoning its wait never cancels it for the others), the
    /// result is stored on success and the in-flight marker is removed on
    /// completion either way.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &Fingerprint,
        ttl: Duration,
        compute: F,
    ) -> Result<(T, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !self.config.enabled {
            return Ok((compute().await?, false));
        }

        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);
        if let Some(value) = self.lookup(key).await {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok((value, true));
        }

        enum Role<T> {
            Leader {
                tx: watch::Sender<SharedResult<T>>,
                rx: watch::Receiver<SharedResult<T>>,
            },
            Waiter(watch::Receiver<SharedResult<T>>),
        }

        let role = {
            let mut map = self.in_flight.lock().unwrap();
            if let Some(rx) = map.get(key.as_str()) {
                Role::Waiter(rx.clone())
            } else {
                let (tx, rx) = watch::channel(None);
                map.insert(key.as_str().to_string(), rx.clone());
                Role::Leader { tx, rx }
            }
        };

        match role {
            Role::Waiter(rx) => {
                let value = Self::await_shared(rx).await?;
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                Ok((value, true))
            }
            Role::Leader { tx, rx } => {
                // A just-finished flight may have stored an entry between our
                // miss and taking leadership; serve it instead of recomputing.
                if let Some(value) = self.lookup(key).await {
                    self.in_flight.lock().unwrap().remove(key.as_str());
                    let _ = tx.send(Some(Ok(value.clone())));
                    self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok((value, true));
                }

                let memory = Arc::clone(&self.memory);
                let store = Arc::clone(&self.store);
                let in_flight = Arc::clone(&self.in_flight);
                let stats = Arc::clone(&self.stats);
                let key_owned = key.as_str().to_string();
                let fut = compute();

                tokio::spawn(async move {
                    let result = fut.await;
                    if let Ok(ref value) = result {
                        persist_entry(
                            &memory,
                            store.as_ref(),
                            &stats,
                            &key_owned,
                            value.clone(),
                            ttl,
                        )
                        .await;
                    }
                    // Marker removal before announcing: a request arriving in
                    // between sees the stored entry as a plain hit.
                    in_flight.lock().unwrap().remove(&key_owned);
                    let _ = tx.send(Some(result));
                });

                let value = Self::await_shared(rx).await?;
                Ok((value, false))
            }
        }
    }

    /// Drop one entry from both layers.
    pub async fn invalidate(&self, key: &Fingerprint) {
        self.memory.lock().unwrap().pop(key.as_str());
        if let Err(e) = self.store.delete(key.as_str()).await {
            warn!(key = key.as_str(), error = %e, "durable cache delete failed");
        }
    }

    /// Evict expired entries eagerly, then trim the durable store to
    /// capacity. Returns how many entries were removed.
    pub async fn cleanup(&self) -> u64 {
        let mut removed = {
            let mut memory = self.memory.lock().unwrap();
            let expired: Vec<String> = memory
                .iter()
                .filter(|(_, entry)| entry.is_expired())
                .map(|(k, _)| k.clone())
                .collect();
            for key in &expired {
                memory.pop(key);
            }
            expired.len() as u64
        };

        match self.store.cleanup(self.config.max_entries).await {
            Ok(n) => removed += n,
            Err(e) => warn!(error = %e, "durable cache cleanup failed"),
        }
        if removed > 0 {
            self.stats.evictions.fetch_add(removed, Ordering::Relaxed);
            debug!(removed, "cache cleanup cycle completed");
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        let memory_live = {
            let memory = self.memory.lock().unwrap();
            memory.iter().filter(|(_, e)| !e.is_expired()).count()
        };
        let durable = self.store.len().await.unwrap_or(0);
        self.stats.to_stats(memory_live.max(durable))
    }

    /// TTL-lazy lookup across the memory layer and the durable store.
    /// Durable failures degrade to a miss.
    async fn lookup(&self, key: &Fingerprint) -> Option<T> {
        {
            let mut memory = self.memory.lock().unwrap();
            if let Some(entry) = memory.get_mut(key.as_str()) {
                if entry.is_expired() {
                    memory.pop(key.as_str());
                } else {
                    entry.last_accessed_at = now_millis();
                    entry.hit_count += 1;
                    return Some(entry.payload.clone());
                }
            }
        }

        let bytes = match self.store.get(key.as_str()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(
                    store = self.store.name(),
                    error = %e,
                    "durable cache unreachable, degrading to pass-through"
                );
                return None;
            }
        };

        let mut entry: CacheEntry<T> = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "dropping undecodable cache entry");
                let _ = self.store.delete(key.as_str()).await;
                return None;
            }
        };
        if entry.is_expired() {
            return None;
        }

        entry.last_accessed_at = now_millis();
        entry.hit_count += 1;
        let payload = entry.payload.clone();
        let mut memory = self.memory.lock().unwrap();
        if let Some((evicted_key, _)) = memory.push(key.as_str().to_string(), entry) {
            if evicted_key != key.as_str() {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        Some(payload)
    }

    async fn await_shared(mut rx: watch::Receiver<SharedResult<T>>) -> Result<T> {
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(result) = current {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(Error::runtime_with_context(
                    "in-flight computation dropped before completing",
                    ErrorContext::new().with_source("response_cache"),
                ));
            }
        }
    }
}

/// Store a freshly computed value in both layers. Runs on the computation
/// task, after success.
async fn persist_entry<T>(
    memory: &Mutex<LruCache<String, CacheEntry<T>>>,
    store: &dyn CacheStore,
    stats: &AtomicStats,
    key: &str,
    payload: T,
    ttl: Duration,
) where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let now = now_millis();
    let size = serde_json::to_vec(&payload).map(|b| b.len()).unwrap_or(0);
    let entry = CacheEntry {
        fingerprint: key.to_string(),
        payload,
        created_at: now,
        expires_at: if ttl.is_zero() {
            0
        } else {
            now + ttl.as_millis() as u64
        },
        last_accessed_at: now,
        hit_count: 0,
        size,
    };

    let bytes = match serde_json::to_vec(&entry) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(key, error = %e, "failed to encode cache entry");
            return;
        }
    };

    {
        let mut memory = memory.lock().unwrap();
        if let Some((evicted_key, _)) = memory.push(key.to_string(), entry) {
            if evicted_key != key {
                stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    if let Err(e) = store.put(key, &bytes, ttl).await {
        warn!(store = store.name(), key, error = %e, "durable cache write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::{MemoryStore, NullStore};
    use std::sync::atomic::AtomicU32;

    fn key(s: &str) -> Fingerprint {
        Fingerprint::new(s)
    }

    fn cache_with(config: CacheConfig) -> ResponseCache<String> {
        ResponseCache::new(config, Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_get_or_compute_stores_then_hits() {
        let cache = cache_with(CacheConfig::default());
        let calls = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&calls);
        let (value, hit) = cache
            .get_or_compute(&key("k1"), Duration::from_secs(60), move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok("computed".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "computed");
        assert!(!hit);

        let c = Arc::clone(&calls);
        let (value, hit) = cache
            .get_or_compute(&key("k1"), Duration::from_secs(60), move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok("recomputed".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "computed");
        assert!(hit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_coalesce_to_one_computation() {
        let cache = Arc::new(cache_with(CacheConfig::default()));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&key("shared"), Duration::from_secs(60), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("one answer".to_string())
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut hits = 0;
        for handle in handles {
            let (value, hit) = handle.await.unwrap();
            assert_eq!(value, "one answer");
            if hit {
                hits += 1;
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(hits, 15);

        let stats = cache.stats().await;
        assert_eq!(stats.total_requests, 16);
        assert_eq!(stats.cache_hits, 15);
    }

    #[tokio::test]
    async fn test_failed_computation_clears_in_flight_marker() {
        let cache = cache_with(CacheConfig::default());

        let result = cache
            .get_or_compute(&key("k"), Duration::from_secs(60), || async {
                Err(Error::backend(
                    "alpha",
                    crate::error::BackendErrorKind::Timeout,
                    "boom",
                ))
            })
            .await;
        assert!(result.is_err());

        // A fresh attempt runs a new computation.
        let (value, hit) = cache
            .get_or_compute(&key("k"), Duration::from_secs(60), || async {
                Ok("second try".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "second try");
        assert!(!hit);
    }

    #[tokio::test]
    async fn test_expired_entry_is_never_returned() {
        let cache = cache_with(CacheConfig::default());
        cache
            .get_or_compute(&key("k"), Duration::from_millis(20), || async {
                Ok("short lived".to_string())
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get(&key("k")).await.is_none());
    }

    #[tokio::test]
    async fn test_lru_eviction_over_capacity() {
        let cache: ResponseCache<String> = ResponseCache::new(
            CacheConfig::default().with_max_entries(2),
            Arc::new(NullStore::new()),
        );
        for (k, v) in [("a", "1"), ("b", "2")] {
            cache
                .get_or_compute(&key(k), Duration::from_secs(60), move || async move {
                    Ok(v.to_string())
                })
                .await
                .unwrap();
        }
        // Touch "a" so "b" becomes least-recently-accessed.
        assert!(cache.get(&key("a")).await.is_some());

        cache
            .get_or_compute(&key("c"), Duration::from_secs(60), || async {
                Ok("3".to_string())
            })
            .await
            .unwrap();

        assert!(cache.get(&key("a")).await.is_some());
        assert!(cache.get(&key("b")).await.is_none());
        assert!(cache.get(&key("c")).await.is_some());
        assert!(cache.stats().await.evictions >= 1);
    }

    #[tokio::test]
    async fn test_durable_store_promotion_after_memory_loss() {
        let store = Arc::new(MemoryStore::new());
        let first: ResponseCache<String> =
            ResponseCache::new(CacheConfig::default(), Arc::clone(&store) as Arc<dyn CacheStore>);
        first
            .get_or_compute(&key("k"), Duration::from_secs(60), || async {
                Ok("durable".to_string())
            })
            .await
            .unwrap();

        // Same durable store, fresh memory layer: simulates a restart.
        let second: ResponseCache<String> =
            ResponseCache::new(CacheConfig::default(), store as Arc<dyn CacheStore>);
        assert_eq!(second.get(&key("k")).await.as_deref(), Some("durable"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_entries() {
        let cache = cache_with(CacheConfig::default());
        cache
            .get_or_compute(&key("old"), Duration::from_millis(10), || async {
                Ok("x".to_string())
            })
            .await
            .unwrap();
        cache
            .get_or_compute(&key("new"), Duration::from_secs(60), || async {
                Ok("y".to_string())
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let removed = cache.cleanup().await;
        assert!(removed >= 1);
        assert_eq!(cache.stats().await.entries_count, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_passes_through() {
        let cache = cache_with(CacheConfig::default().with_enabled(false));
        let calls = Arc::new(AtomicU32::new(0));
        for _ in 0..2 {
            let c = Arc::clone(&calls);
            let (_, hit) = cache
                .get_or_compute(&key("k"), Duration::from_secs(60), move || async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok("v".to_string())
                })
                .await
                .unwrap();
            assert!(!hit);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let cache = cache_with(CacheConfig::default());
        cache
            .get_or_compute(&key("k"), Duration::from_secs(60), || async {
                Ok("v1".to_string())
            })
            .await
            .unwrap();
        cache.invalidate(&key("k")).await;
        let (value, hit) = cache
            .get_or_compute(&key("k"), Duration::from_secs(60), || async {
                Ok("v2".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "v2");
        assert!(!hit);
    }
}
