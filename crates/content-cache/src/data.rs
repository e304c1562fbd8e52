//! Structured data tier
//!
//! Arbitrary serializable values stored as JSON under a string key, each
//! with an explicit expiry. Expired entries are invisible to reads even
//! before a sweep removes them.

use crate::clock::{saturating_after, Clock};
use crate::config::{DataTierConfig, TrackerConfig};
use crate::error::Result;
use crate::tier::{Capacity, TierMap};
use crate::types::{CacheEntry, TierMetrics};
use chrono::{DateTime, Duration, Utc};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
enum Payload {
    Plain(Vec<u8>),
    Compressed(Vec<u8>),
}

impl Payload {
    fn len(&self) -> usize {
        match self {
            Payload::Plain(data) | Payload::Compressed(data) => data.len(),
        }
    }

    fn decode<T: DeserializeOwned>(&self) -> std::result::Result<T, String> {
        match self {
            Payload::Plain(data) => serde_json::from_slice(data).map_err(|e| e.to_string()),
            Payload::Compressed(data) => {
                let plain = decompress_size_prepended(data).map_err(|e| e.to_string())?;
                serde_json::from_slice(&plain).map_err(|e| e.to_string())
            }
        }
    }
}

pub struct StructuredDataCache {
    state: Mutex<TierMap<Payload>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl StructuredDataCache {
    pub fn new(config: &DataTierConfig, tracker: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = Capacity {
            max_items: config.max_items,
            max_bytes: config.max_bytes,
        };

        Self {
            state: Mutex::new(TierMap::new(tracker, config.eviction, Some(capacity))),
            clock,
            default_ttl: config.default_ttl,
        }
    }

    /// Serialize and store `value`, replacing any previous entry.
    ///
    /// Without an explicit `expiration` the entry lives for the default TTL.
    pub fn store<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        let now = self.clock.now();
        let expires_at = expiration.unwrap_or_else(|| saturating_after(now, self.default_ttl));
        let size = data.len();

        let entry = CacheEntry::new(Payload::Plain(data), size, now).with_expiry(expires_at);
        match self.state.lock().insert(key, entry, now) {
            Some(0) => {}
            Some(evicted) => debug!(key, evicted, "Evicted records to make room"),
            None => debug!(key, size, "Record exceeds memory ceiling, not cached"),
        }
        Ok(())
    }

    /// Fetch and deserialize `key`. Expired or undecodable entries are
    /// evicted and reported as a miss.
    pub fn retrieve<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let mut map = self.state.lock();

        // Outer None: absent. Inner None: expired.
        let decoded = map.get(key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.decode::<T>())
            }
        });

        let Some(decoded) = decoded else {
            map.counters_mut().miss();
            debug!(key, "Record cache miss");
            return None;
        };

        match decoded {
            None => {
                map.remove(key);
                map.counters_mut().miss();
                debug!(key, "Record expired");
                None
            }
            Some(Err(e)) => {
                map.remove(key);
                map.counters_mut().miss();
                warn!(key, error = %e, "Evicting undecodable record");
                None
            }
            Some(Ok(value)) => {
                map.touch(key, now);
                map.counters_mut().hit();
                debug!(key, "Record cache hit");
                Some(value)
            }
        }
    }

    /// Whether a live entry exists; does not count as a request
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.state
            .lock()
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn remove(&self, key: &str) -> bool {
        self.state.lock().remove(key).is_some()
    }

    pub fn clear_expired(&self) -> usize {
        let now = self.clock.now();
        let removed = self.state.lock().clear_expired_entries(now);
        if removed > 0 {
            info!(removed, "Cleared expired records");
        }
        removed
    }

    pub fn clear_low_priority(&self) -> usize {
        let removed = self.state.lock().clear_low_priority();
        debug!(removed, "Cleared low-priority records");
        removed
    }

    /// Compress hot payloads in place when that makes them smaller
    pub fn compress_frequent_items(&self) -> usize {
        let mut map = self.state.lock();
        let mut compressed = 0;

        for key in map.tracker().frequent_keys() {
            let packed = match map.get(&key).map(|entry| &entry.value) {
                Some(Payload::Plain(data)) => {
                    let packed = compress_prepend_size(data);
                    (packed.len() < data.len()).then_some(packed)
                }
                _ => None,
            };

            if let Some(packed) = packed {
                let size = packed.len();
                if map.replace_value(&key, Payload::Compressed(packed), size) {
                    compressed += 1;
                }
            }
        }

        if compressed > 0 {
            info!(compressed, "Compressed frequently used records");
        }
        compressed
    }

    pub fn clear(&self) {
        self.state.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> TierMetrics {
        self.state.lock().metrics("data")
    }

    /// Stored size of `key` in bytes, after any compression
    pub fn stored_size(&self, key: &str) -> Option<usize> {
        self.state.lock().get(key).map(|entry| entry.value.len())
    }
}
