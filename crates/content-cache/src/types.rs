//! Cache types

use chrono::{DateTime, Utc};
use file_blob_store::StoreUsage;
use serde::{Deserialize, Serialize};

/// A stored value plus its metadata, owned by the tier that created it
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub estimated_size: usize,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, estimated_size: usize, stored_at: DateTime<Utc>) -> Self {
        Self {
            value,
            stored_at,
            expires_at: None,
            estimated_size,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }
}

/// Request and hit counters for one tier. Both move together, so
/// `hits <= requests` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounters {
    pub hits: u64,
    pub requests: u64,
}

impl TierCounters {
    pub fn hit(&mut self) {
        self.requests += 1;
        self.hits += 1;
    }

    pub fn miss(&mut self) {
        self.requests += 1;
    }

    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits, self.requests)
    }
}

/// Point-in-time metrics for a single tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierMetrics {
    pub name: String,
    pub size_bytes: u64,
    pub item_count: usize,
    pub hits: u64,
    pub requests: u64,
    pub hit_rate: f64,
}

impl TierMetrics {
    pub fn new(name: &str, size_bytes: u64, item_count: usize, counters: TierCounters) -> Self {
        Self {
            name: name.to_string(),
            size_bytes,
            item_count,
            hits: counters.hits,
            requests: counters.requests,
            hit_rate: counters.hit_rate(),
        }
    }
}

/// Aggregate statistics, recomputed from tier metrics rather than mutated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub total_size: u64,
    pub blob_size: u64,
    pub data_size: u64,
    pub post_size: u64,
    pub user_size: u64,
    pub total_items: usize,
    pub hits: u64,
    pub requests: u64,
    pub hit_rate: f64,
    pub computed_at: Option<DateTime<Utc>>,
}

impl CacheStatistics {
    pub fn from_metrics(
        blob: &TierMetrics,
        data: &TierMetrics,
        posts: &TierMetrics,
        users: &TierMetrics,
        now: DateTime<Utc>,
    ) -> Self {
        let tiers = [blob, data, posts, users];
        let hits = tiers.iter().map(|t| t.hits).sum();
        let requests = tiers.iter().map(|t| t.requests).sum();

        Self {
            total_size: tiers.iter().map(|t| t.size_bytes).sum(),
            blob_size: blob.size_bytes,
            data_size: data.size_bytes,
            post_size: posts.size_bytes,
            user_size: users.size_bytes,
            total_items: tiers.iter().map(|t| t.item_count).sum(),
            hits,
            requests,
            hit_rate: hit_rate(hits, requests),
            computed_at: Some(now),
        }
    }
}

/// Diagnostics snapshot: aggregate statistics plus every tier's metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheReport {
    pub statistics: CacheStatistics,
    pub tiers: Vec<TierMetrics>,
    /// On-disk usage of the persistent tier, absent if it could not be read
    pub disk: Option<StoreUsage>,
}

fn hit_rate(hits: u64, requests: u64) -> f64 {
    if requests == 0 {
        0.0
    } else {
        hits as f64 / requests as f64
    }
}
