//! In-memory blob tier backed by the file store
//!
//! Decoded blobs (images) live in a bounded map. The file store is the
//! fallback on a memory miss and keeps its copy when a blob leaves memory.

use crate::clock::{saturating_before, Clock};
use crate::config::{BlobTierConfig, TrackerConfig};
use crate::error::{CacheError, Result};
use crate::loader::BlobLoader;
use crate::tier::{Capacity, TierMap};
use crate::types::{CacheEntry, TierMetrics};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use file_blob_store::{BlobStore, StoreUsage};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct BlobState {
    map: TierMap<Bytes>,
    /// Keys whose current value also has a compressed variant on disk
    compressed: HashSet<String>,
}

pub struct MemoryBlobCache {
    state: Mutex<BlobState>,
    store: BlobStore,
    clock: Arc<dyn Clock>,
    idle_window: Duration,
}

impl MemoryBlobCache {
    pub fn new(config: &BlobTierConfig, tracker: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = Capacity {
            max_items: config.max_items,
            max_bytes: config.max_bytes,
        };

        Self {
            state: Mutex::new(BlobState {
                map: TierMap::new(tracker, config.eviction, Some(capacity)),
                compressed: HashSet::new(),
            }),
            store: BlobStore::new(config.cache_dir.clone()),
            clock,
            idle_window: config.idle_window,
        }
    }

    /// Prepare the persistent store; failure leaves the tier memory-only
    pub async fn init(&self) {
        if let Err(e) = self.store.init().await {
            warn!(root = ?self.store.root(), error = %e, "Blob store unavailable");
        }
    }

    pub(crate) fn persistent(&self) -> &BlobStore {
        &self.store
    }

    /// Memory-only lookup; never touches disk or the network
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let found = self.lookup(key);
        if found.is_none() {
            self.state.lock().map.counters_mut().miss();
            debug!(key, "Blob cache miss");
        }
        found
    }

    /// Presence check that does not count as a request
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().map.get(key).is_some()
    }

    /// Return the blob for `key` from memory, then disk, then `loader`.
    ///
    /// Only a loader failure is reported as an error. If the caller drops
    /// this future while the loader is pending, nothing is stored.
    pub async fn preload(&self, key: &str, loader: &dyn BlobLoader) -> Result<Bytes> {
        if let Some(bytes) = self.lookup(key) {
            return Ok(bytes);
        }

        if let Some(bytes) = self.read_persistent(key).await {
            let mut state = self.state.lock();
            state.map.counters_mut().hit();
            self.admit(&mut state, key, bytes.clone());
            debug!(key, size = bytes.len(), "Blob restored from disk");
            return Ok(bytes);
        }

        self.state.lock().map.counters_mut().miss();
        let data = loader.load(key).await.map_err(CacheError::Fetch)?;
        let bytes = Bytes::from(data);

        {
            let mut state = self.state.lock();
            state.compressed.remove(key);
            self.admit(&mut state, key, bytes.clone());
        }

        if let Err(e) = self.store.write(key, &bytes).await {
            warn!(key, error = %e, "Failed to persist blob");
        }

        debug!(key, size = bytes.len(), "Blob loaded");
        Ok(bytes)
    }

    fn lookup(&self, key: &str) -> Option<Bytes> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let bytes = state.map.get(key).map(|entry| entry.value.clone())?;
        state.map.touch(key, now);
        state.map.counters_mut().hit();
        debug!(key, "Blob cache hit");
        Some(bytes)
    }

    async fn read_persistent(&self, key: &str) -> Option<Bytes> {
        match self.store.read(key).await {
            Ok(Some(data)) => return Some(Bytes::from(data)),
            Ok(None) => {}
            Err(e) => {
                warn!(key, error = %e, "Failed to read persisted blob");
                return None;
            }
        }

        match self.store.read_compressed(key).await {
            Ok(found) => found.map(Bytes::from),
            Err(e) => {
                warn!(key, error = %e, "Failed to read compressed blob");
                None
            }
        }
    }

    fn admit(&self, state: &mut BlobState, key: &str, bytes: Bytes) {
        let now = self.clock.now();
        let size = bytes.len();

        match state.map.insert(key, CacheEntry::new(bytes, size, now), now) {
            Some(0) => {}
            Some(evicted) => debug!(key, evicted, "Evicted blobs to make room"),
            None => debug!(key, size, "Blob exceeds memory ceiling, kept on disk only"),
        }
    }

    /// Drop blobs idle for longer than the idle window from memory
    pub fn clear_expired(&self) -> usize {
        let cutoff = saturating_before(self.clock.now(), self.idle_window);
        let removed = self.state.lock().map.clear_idle(cutoff);
        if removed > 0 {
            info!(removed, "Cleared idle blobs");
        }
        removed
    }

    pub fn clear_low_priority(&self) -> usize {
        let removed = self.state.lock().map.clear_low_priority();
        debug!(removed, "Cleared low-priority blobs");
        removed
    }

    /// Write compressed variants of hot blobs to disk; memory is untouched
    pub async fn compress_frequent_items(&self) -> usize {
        let candidates: Vec<(String, Bytes, DateTime<Utc>)> = {
            let state = self.state.lock();
            state
                .map
                .tracker()
                .frequent_keys()
                .into_iter()
                .filter(|key| !state.compressed.contains(key))
                .filter_map(|key| {
                    let entry = state.map.get(&key)?;
                    Some((key, entry.value.clone(), entry.stored_at))
                })
                .collect()
        };

        let mut written = 0;
        for (key, bytes, stored_at) in candidates {
            if let Err(e) = self.store.write_compressed(&key, &bytes).await {
                warn!(key = %key, error = %e, "Failed to write compressed blob");
                continue;
            }

            let mut state = self.state.lock();
            let unchanged = state
                .map
                .get(&key)
                .is_some_and(|entry| entry.stored_at == stored_at);
            if unchanged {
                state.compressed.insert(key);
            }
            written += 1;
        }

        if written > 0 {
            info!(written, "Compressed frequently used blobs");
        }
        written
    }

    /// Empty memory and the persistent store
    pub async fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.map.clear();
            state.compressed.clear();
        }

        if let Err(e) = self.store.clear().await {
            warn!(root = ?self.store.root(), error = %e, "Failed to clear blob store");
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> TierMetrics {
        self.state.lock().map.metrics("blob")
    }

    pub fn access_count(&self, key: &str) -> Option<u64> {
        self.state
            .lock()
            .map
            .tracker()
            .get(key)
            .map(|record| record.access_count)
    }

    /// Disk usage of the persistent store, `None` if it cannot be read
    pub async fn persistent_usage(&self) -> Option<StoreUsage> {
        match self.store.usage().await {
            Ok(usage) => Some(usage),
            Err(e) => {
                warn!(error = %e, "Failed to measure blob store");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_support::{CountingLoader, PendingLoader};
    use tempfile::tempdir;

    fn create_cache(
        dir: &tempfile::TempDir,
        max_items: usize,
        max_bytes: usize,
    ) -> (MemoryBlobCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let config = BlobTierConfig {
            cache_dir: dir.path().join("blobs"),
            max_items,
            max_bytes,
            ..BlobTierConfig::default()
        };
        let cache = MemoryBlobCache::new(&config, TrackerConfig::default(), clock.clone());
        (cache, clock)
    }

    #[tokio::test]
    async fn test_preload_miss_then_hit() {
        let dir = tempdir().unwrap();
        let (cache, _) = create_cache(&dir, 10, 1024);
        cache.init().await;
        let loader = CountingLoader::returning(b"jpeg bytes");

        let first = cache.preload("https://img/1", &loader).await.unwrap();
        let second = cache.preload("https://img/1", &loader).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(&first[..], b"jpeg bytes");
        assert_eq!(loader.calls(), 1);

        let metrics = cache.metrics();
        assert_eq!(metrics.requests, 2);
        assert_eq!(metrics.hits, 1);

        // Persisted for the next process
        let on_disk = cache.persistent().read("https://img/1").await.unwrap();
        assert_eq!(on_disk.as_deref(), Some(&b"jpeg bytes"[..]));
    }

    #[tokio::test]
    async fn test_get_is_memory_only() {
        let dir = tempdir().unwrap();
        let (cache, _) = create_cache(&dir, 10, 1024);
        cache.init().await;

        assert!(cache.get("https://img/1").is_none());

        let loader = CountingLoader::returning(b"data");
        cache.preload("https://img/1", &loader).await.unwrap();
        assert_eq!(cache.get("https://img/1").as_deref(), Some(&b"data"[..]));

        // Evict from memory; get does not fall through to disk
        cache.clear_low_priority();
        assert!(cache.get("https://img/1").is_none());

        let metrics = cache.metrics();
        assert!(metrics.hits <= metrics.requests);
    }

    #[tokio::test]
    async fn test_preload_restores_from_disk() {
        let dir = tempdir().unwrap();
        let (cache, _) = create_cache(&dir, 10, 1024);
        cache.init().await;
        let loader = CountingLoader::returning(b"data");

        cache.preload("k", &loader).await.unwrap();
        cache.clear_low_priority();
        assert!(!cache.contains("k"));

        let restored = cache.preload("k", &loader).await.unwrap();
        assert_eq!(&restored[..], b"data");
        assert_eq!(loader.calls(), 1);
        assert!(cache.contains("k"));
    }

    #[tokio::test]
    async fn test_preload_falls_back_to_compressed_variant() {
        let dir = tempdir().unwrap();
        let (cache, _) = create_cache(&dir, 10, 1024);
        cache.init().await;

        cache.persistent().write_compressed("k", b"compressed only").await.unwrap();

        let loader = CountingLoader::failing();
        let restored = cache.preload("k", &loader).await.unwrap();
        assert_eq!(&restored[..], b"compressed only");
        assert_eq!(loader.calls(), 0);
    }

    #[tokio::test]
    async fn test_loader_failure_propagates() {
        let dir = tempdir().unwrap();
        let (cache, _) = create_cache(&dir, 10, 1024);
        cache.init().await;

        let result = cache.preload("missing", &CountingLoader::failing()).await;
        assert!(matches!(result, Err(CacheError::Fetch(_))));
        assert!(cache.is_empty());
        assert!(cache.persistent().read("missing").await.unwrap().is_none());

        let metrics = cache.metrics();
        assert_eq!(metrics.requests, 1);
        assert_eq!(metrics.hits, 0);
    }

    #[tokio::test]
    async fn test_cancelled_preload_stores_nothing() {
        let dir = tempdir().unwrap();
        let (cache, _) = create_cache(&dir, 10, 1024);
        cache.init().await;

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            cache.preload("slow", &PendingLoader),
        )
        .await;

        assert!(result.is_err());
        assert!(!cache.contains("slow"));
        assert!(cache.persistent().read("slow").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_byte_ceiling() {
        let dir = tempdir().unwrap();
        let (cache, _) = create_cache(&dir, 100, 100);
        cache.init().await;
        let loader = CountingLoader::returning(&[1u8; 40]);

        for i in 0..10 {
            cache.preload(&format!("k{}", i), &loader).await.unwrap();
            assert!(cache.metrics().size_bytes <= 100);
        }
        assert!(cache.contains("k9"));
    }

    #[tokio::test]
    async fn test_oversized_blob_is_served_but_not_held() {
        let dir = tempdir().unwrap();
        let (cache, _) = create_cache(&dir, 10, 16);
        cache.init().await;
        let loader = CountingLoader::returning(&[9u8; 64]);

        let bytes = cache.preload("huge", &loader).await.unwrap();
        assert_eq!(bytes.len(), 64);
        assert!(!cache.contains("huge"));
        assert!(cache.persistent().read("huge").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_expired_uses_idle_time() {
        let dir = tempdir().unwrap();
        let (cache, clock) = create_cache(&dir, 10, 1024);
        cache.init().await;
        let loader = CountingLoader::returning(b"data");

        cache.preload("old", &loader).await.unwrap();
        clock.advance(Duration::days(6));
        cache.preload("new", &loader).await.unwrap();
        // Touching keeps it alive
        cache.get("old");
        clock.advance(Duration::days(2));
        cache.preload("newest", &loader).await.unwrap();

        assert_eq!(cache.clear_expired(), 0);

        clock.advance(Duration::days(6));
        assert_eq!(cache.clear_expired(), 2);
        assert!(cache.contains("newest"));
    }

    #[tokio::test]
    async fn test_unbounded_idle_window_does_not_overflow() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::default());
        let config = BlobTierConfig {
            cache_dir: dir.path().join("blobs"),
            idle_window: Duration::seconds(9_000_000_000_000),
            ..BlobTierConfig::default()
        };
        let cache = MemoryBlobCache::new(&config, TrackerConfig::default(), clock.clone());
        cache.init().await;

        cache
            .preload("k", &CountingLoader::returning(b"data"))
            .await
            .unwrap();
        clock.advance(Duration::days(365));

        assert_eq!(cache.clear_expired(), 0);
        assert!(cache.contains("k"));
    }

    #[tokio::test]
    async fn test_compress_frequent_items() {
        let dir = tempdir().unwrap();
        let (cache, _) = create_cache(&dir, 10, 1024);
        cache.init().await;
        let loader = CountingLoader::returning(&[5u8; 512]);

        cache.preload("hot", &loader).await.unwrap();
        cache.preload("cold", &loader).await.unwrap();
        for _ in 0..11 {
            cache.get("hot");
        }

        assert_eq!(cache.compress_frequent_items().await, 1);
        assert!(cache.contains("hot"));
        let compressed = cache.persistent().read_compressed("hot").await.unwrap();
        assert_eq!(compressed.map(|c| c.len()), Some(512));

        // Already compressed
        assert_eq!(cache.compress_frequent_items().await, 0);
    }

    #[tokio::test]
    async fn test_clear_twice() {
        let dir = tempdir().unwrap();
        let (cache, _) = create_cache(&dir, 10, 1024);
        cache.init().await;
        cache
            .preload("k", &CountingLoader::returning(b"data"))
            .await
            .unwrap();

        cache.clear().await;
        let once = (cache.metrics(), cache.persistent_usage().await);
        cache.clear().await;
        let twice = (cache.metrics(), cache.persistent_usage().await);

        assert_eq!(once, twice);
        assert!(cache.is_empty());
        assert_eq!(once.1.map(|u| u.files), Some(0));
    }
}
