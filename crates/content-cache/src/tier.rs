//! Bounded key map shared by every in-memory tier
//!
//! Holds the entries, their access records and the tier counters behind a
//! single owner so that the three never drift apart. Callers wrap it in one
//! mutex per tier.

use crate::config::TrackerConfig;
use crate::tracker::{AccessRecord, AccessTracker, EvictionFraction};
use crate::types::{CacheEntry, TierCounters, TierMetrics};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Hard ceilings, both enforced on every insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Capacity {
    pub max_items: usize,
    pub max_bytes: usize,
}

#[derive(Debug)]
pub(crate) struct TierMap<V> {
    entries: HashMap<String, CacheEntry<V>>,
    tracker: AccessTracker,
    counters: TierCounters,
    total_size: usize,
    capacity: Option<Capacity>,
    eviction: EvictionFraction,
}

impl<V> TierMap<V> {
    pub fn new(
        tracker: TrackerConfig,
        eviction: EvictionFraction,
        capacity: Option<Capacity>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            tracker: AccessTracker::new(tracker),
            counters: TierCounters::default(),
            total_size: 0,
            capacity,
            eviction,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn size(&self) -> usize {
        self.total_size
    }

    pub fn counters_mut(&mut self) -> &mut TierCounters {
        &mut self.counters
    }

    pub fn tracker(&self) -> &AccessTracker {
        &self.tracker
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.entries.get(key)
    }

    /// Count an access to a present key
    pub fn touch(&mut self, key: &str, now: DateTime<Utc>) -> Option<AccessRecord> {
        if self.entries.contains_key(key) {
            Some(self.tracker.record(key, now))
        } else {
            None
        }
    }

    pub fn boost(&mut self, key: &str, amount: u64) {
        self.tracker.boost(key, amount);
    }

    /// Swap the stored value in place, keeping access history
    pub fn replace_value(&mut self, key: &str, value: V, estimated_size: usize) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                self.total_size = self.total_size - entry.estimated_size + estimated_size;
                entry.value = value;
                entry.estimated_size = estimated_size;
                true
            }
            None => false,
        }
    }

    /// Insert or replace `key`, evicting low-priority keys until both
    /// ceilings hold. Returns the number of evicted keys, or `None` when the
    /// entry alone exceeds the byte ceiling and was not stored.
    pub fn insert(&mut self, key: &str, entry: CacheEntry<V>, now: DateTime<Utc>) -> Option<usize> {
        let size = entry.estimated_size;

        // Lift any previous value out so it is neither counted nor evicted
        let prior = match self.entries.remove(key) {
            Some(old) => {
                self.total_size -= old.estimated_size;
                self.tracker.remove(key)
            }
            None => None,
        };

        if let Some(capacity) = self.capacity {
            if size > capacity.max_bytes || capacity.max_items == 0 {
                return None;
            }
        }

        let mut evicted = 0;
        while self.exceeds_with(size) {
            let removed = self.clear_low_priority();
            if removed == 0 {
                break;
            }
            evicted += removed;
        }

        if let Some(record) = prior {
            self.tracker.restore(key, record);
        }
        self.total_size += size;
        self.entries.insert(key.to_string(), entry);
        self.tracker.record(key, now);

        Some(evicted)
    }

    fn exceeds_with(&self, size: usize) -> bool {
        match self.capacity {
            Some(capacity) => {
                self.entries.len() + 1 > capacity.max_items
                    || self.total_size + size > capacity.max_bytes
            }
            None => false,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.total_size -= entry.estimated_size;
        self.tracker.remove(key);
        Some(entry)
    }

    pub fn remove_all(&mut self, keys: &[String]) -> usize {
        keys.iter().filter(|key| self.remove(key).is_some()).count()
    }

    /// Evict the configured bottom fraction of keys by priority
    pub fn clear_low_priority(&mut self) -> usize {
        let victims = self.tracker.lowest_priority_keys(self.eviction);
        self.remove_all(&victims)
    }

    /// Evict keys whose last access predates `cutoff`
    pub fn clear_idle(&mut self, cutoff: DateTime<Utc>) -> usize {
        let victims = self.tracker.expired_since(cutoff);
        self.remove_all(&victims)
    }

    /// Evict entries whose explicit expiry has passed
    pub fn clear_expired_entries(&mut self, now: DateTime<Utc>) -> usize {
        let victims: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        self.remove_all(&victims)
    }

    /// Drop every entry and record; counters are lifetime telemetry and stay
    pub fn clear(&mut self) {
        self.entries.clear();
        self.tracker.clear();
        self.total_size = 0;
    }

    pub fn metrics(&self, name: &str) -> TierMetrics {
        TierMetrics::new(name, self.total_size as u64, self.entries.len(), self.counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn bounded(max_items: usize, max_bytes: usize) -> TierMap<Vec<u8>> {
        TierMap::new(
            TrackerConfig::default(),
            EvictionFraction::ONE_THIRD,
            Some(Capacity {
                max_items,
                max_bytes,
            }),
        )
    }

    fn entry(size: usize, now: DateTime<Utc>) -> CacheEntry<Vec<u8>> {
        CacheEntry::new(vec![0; size], size, now)
    }

    fn assert_in_sync<V>(map: &TierMap<V>) {
        assert_eq!(map.entries.len(), map.tracker.len());
        for key in map.entries.keys() {
            assert!(map.tracker.get(key).is_some());
        }
        let size: usize = map.entries.values().map(|e| e.estimated_size).sum();
        assert_eq!(size, map.total_size);
    }

    #[test]
    fn test_insert_and_get() {
        let now = Utc::now();
        let mut map = bounded(10, 1000);

        assert_eq!(map.insert("a", entry(10, now), now), Some(0));
        assert_eq!(map.get("a").unwrap().value.len(), 10);
        assert_eq!(map.size(), 10);
        assert_in_sync(&map);
    }

    #[test]
    fn test_replace_keeps_history() {
        let now = Utc::now();
        let mut map = bounded(10, 1000);

        map.insert("a", entry(10, now), now);
        map.touch("a", now);
        map.insert("a", entry(30, now), now);

        assert_eq!(map.len(), 1);
        assert_eq!(map.size(), 30);
        assert_eq!(map.tracker().get("a").unwrap().access_count, 3);
        assert_in_sync(&map);
    }

    #[test]
    fn test_priority_eviction_removes_lowest_third() {
        let now = Utc::now();
        let mut map = TierMap::new(TrackerConfig::default(), EvictionFraction::ONE_THIRD, None);

        for (i, key) in ["p1", "p2", "p3", "p4", "p5", "p6"].iter().enumerate() {
            map.insert(key, entry(1, now), now);
            for _ in 0..i {
                map.touch(key, now);
            }
        }

        assert_eq!(map.clear_low_priority(), 2);
        assert!(map.get("p1").is_none());
        assert!(map.get("p2").is_none());
        for key in ["p3", "p4", "p5", "p6"] {
            assert!(map.get(key).is_some());
        }
        assert_in_sync(&map);
    }

    #[test]
    fn test_byte_ceiling_enforced() {
        let now = Utc::now();
        let mut map = bounded(100, 100);

        for i in 0..20 {
            let key = format!("k{}", i);
            assert!(map.insert(&key, entry(30, now), now).is_some());
            assert!(map.size() <= 100);
            assert_in_sync(&map);
        }
        assert!(map.get("k19").is_some());
    }

    #[test]
    fn test_item_ceiling_enforced() {
        let now = Utc::now();
        let mut map = bounded(3, usize::MAX);

        for i in 0..10 {
            map.insert(&format!("k{}", i), entry(1, now), now);
            assert!(map.len() <= 3);
        }
        assert!(map.get("k9").is_some());
        assert_in_sync(&map);
    }

    #[test]
    fn test_ceilings_hold_with_zero_fraction() {
        let now = Utc::now();
        let mut map = TierMap::new(
            TrackerConfig::default(),
            EvictionFraction::new(0, 3),
            Some(Capacity {
                max_items: 2,
                max_bytes: 25,
            }),
        );

        for i in 0..5 {
            assert!(map.insert(&format!("k{}", i), entry(10, now), now).is_some());
            assert!(map.len() <= 2);
            assert!(map.size() <= 25);
        }
        assert!(map.get("k4").is_some());
        assert_in_sync(&map);
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let now = Utc::now();
        let mut map = bounded(10, 100);

        map.insert("big", entry(50, now), now);
        assert_eq!(map.insert("big", entry(101, now), now), None);

        // The stale value does not linger
        assert!(map.get("big").is_none());
        assert_eq!(map.size(), 0);
        assert_in_sync(&map);
    }

    #[test]
    fn test_clear_idle_and_expired() {
        let now = Utc::now();
        let mut map = TierMap::new(TrackerConfig::default(), EvictionFraction::ONE_THIRD, None);

        map.insert("idle", entry(1, now - Duration::hours(2)), now - Duration::hours(2));
        map.insert("active", entry(1, now), now);
        assert_eq!(map.clear_idle(now - Duration::hours(1)), 1);
        assert!(map.get("active").is_some());

        map.insert(
            "ttl",
            entry(1, now).with_expiry(now - Duration::seconds(1)),
            now,
        );
        assert_eq!(map.clear_expired_entries(now), 1);
        assert!(map.get("ttl").is_none());
        assert_in_sync(&map);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut map: TierMap<Vec<u8>> = bounded(10, 100);
        assert!(map.remove("missing").is_none());
        assert_eq!(map.remove_all(&["missing".to_string()]), 0);
    }

    #[test]
    fn test_clear_twice() {
        let now = Utc::now();
        let mut map = bounded(10, 1000);
        map.insert("a", entry(10, now), now);
        map.counters_mut().hit();

        map.clear();
        let once = map.metrics("t");
        map.clear();
        let twice = map.metrics("t");

        assert_eq!(once, twice);
        assert_eq!(once.item_count, 0);
        assert_eq!(once.size_bytes, 0);
        assert_in_sync(&map);
    }

    #[test]
    fn test_replace_value_updates_size() {
        let now = Utc::now();
        let mut map = bounded(10, 1000);
        map.insert("a", entry(100, now), now);

        assert!(map.replace_value("a", vec![1; 10], 10));
        assert!(!map.replace_value("missing", vec![], 0));
        assert_eq!(map.size(), 10);
        assert_in_sync(&map);
    }
}
