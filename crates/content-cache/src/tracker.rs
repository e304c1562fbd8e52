//! Access tracking
//!
//! Per-key recency, frequency and priority bookkeeping kept next to (never
//! inside) each tier's value map. The priority ordering produced here is the
//! eviction candidate list for every tier.

use crate::config::TrackerConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Share of a tier's keys removed by one low-priority sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionFraction {
    pub numerator: u32,
    pub denominator: u32,
}

impl EvictionFraction {
    pub const ONE_THIRD: Self = Self::new(1, 3);
    pub const ONE_QUARTER: Self = Self::new(1, 4);

    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Number of keys to take out of `len`: rounded up, at least one for a
    /// non-empty tier, never more than `len`
    pub fn of(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        if self.denominator == 0 {
            return len;
        }
        (len * self.numerator as usize)
            .div_ceil(self.denominator as usize)
            .clamp(1, len)
    }
}

/// Access metadata for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessRecord {
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub priority: u64,
    #[serde(skip)]
    frequency_boosted: bool,
}

impl AccessRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_accessed: now,
            access_count: 0,
            priority: 0,
            frequency_boosted: false,
        }
    }
}

/// Access records for one tier
#[derive(Debug)]
pub struct AccessTracker {
    records: HashMap<String, AccessRecord>,
    config: TrackerConfig,
}

impl AccessTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            records: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> TrackerConfig {
        self.config
    }

    /// Count an access to `key`, creating its record on first use
    pub fn record(&mut self, key: &str, now: DateTime<Utc>) -> AccessRecord {
        let threshold = self.config.frequency_threshold;
        let boost = self.config.frequency_boost;

        let record = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| AccessRecord::new(now));

        record.access_count += 1;
        record.last_accessed = now;
        record.priority += 1;

        if !record.frequency_boosted && record.access_count > threshold {
            record.priority += boost;
            record.frequency_boosted = true;
        }

        *record
    }

    /// Raise a key's priority without counting an access
    pub fn boost(&mut self, key: &str, amount: u64) {
        if let Some(record) = self.records.get_mut(key) {
            record.priority += amount;
        }
    }

    pub fn get(&self, key: &str) -> Option<&AccessRecord> {
        self.records.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<AccessRecord> {
        self.records.remove(key)
    }

    /// Put back a record previously taken with [`AccessTracker::remove`]
    pub fn restore(&mut self, key: &str, record: AccessRecord) {
        self.records.insert(key.to_string(), record);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Eviction candidates: the bottom `fraction` of keys by ascending
    /// priority, older `last_accessed` first among equal priorities
    pub fn lowest_priority_keys(&self, fraction: EvictionFraction) -> Vec<String> {
        let count = fraction.of(self.records.len());
        if count == 0 {
            return Vec::new();
        }

        let mut ranked: Vec<(&String, &AccessRecord)> = self.records.iter().collect();
        ranked.sort_by(|(ka, a), (kb, b)| {
            a.priority
                .cmp(&b.priority)
                .then(a.last_accessed.cmp(&b.last_accessed))
                .then(ka.cmp(kb))
        });

        ranked
            .into_iter()
            .take(count)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Keys whose last access predates `cutoff`
    pub fn expired_since(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, record)| record.last_accessed < cutoff)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Keys accessed at or after `cutoff`
    pub fn accessed_since(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, record)| record.last_accessed >= cutoff)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Keys accessed more often than the frequency threshold
    pub fn frequent_keys(&self) -> Vec<String> {
        let threshold = self.config.frequency_threshold;
        self.records
            .iter()
            .filter(|(_, record)| record.access_count > threshold)
            .map(|(key, _)| key.clone())
            .collect()
    }
}
