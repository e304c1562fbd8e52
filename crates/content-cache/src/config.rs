//! Cache configuration

use crate::tracker::EvictionFraction;
use chrono::Duration;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Access tracking parameters shared by every tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Access count above which a key is considered hot
    pub frequency_threshold: u64,
    /// One-time priority boost when a key first becomes hot
    pub frequency_boost: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            frequency_threshold: 10,
            frequency_boost: 2,
        }
    }
}

/// Memory blob tier and its persistent store
#[derive(Debug, Clone)]
pub struct BlobTierConfig {
    pub cache_dir: PathBuf,
    pub max_items: usize,
    pub max_bytes: usize,
    /// Time since last access after which a blob leaves memory
    pub idle_window: Duration,
    pub eviction: EvictionFraction,
}

impl Default for BlobTierConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache/blobs"),
            max_items: 200,
            max_bytes: 100 * 1024 * 1024, // 100MB
            idle_window: Duration::days(7),
            eviction: EvictionFraction::ONE_THIRD,
        }
    }
}

/// Structured data tier
#[derive(Debug, Clone)]
pub struct DataTierConfig {
    pub max_items: usize,
    pub max_bytes: usize,
    /// Expiration applied when `store` is called without one
    pub default_ttl: Duration,
    pub eviction: EvictionFraction,
}

impl Default for DataTierConfig {
    fn default() -> Self {
        Self {
            max_items: 500,
            max_bytes: 50 * 1024 * 1024, // 50MB
            default_ttl: Duration::hours(1),
            eviction: EvictionFraction::ONE_THIRD,
        }
    }
}

/// Entity tier (posts or users)
#[derive(Debug, Clone)]
pub struct EntityTierConfig {
    pub idle_window: Duration,
    pub eviction: EvictionFraction,
    /// Entities accessed within this window are boosted by `update_priorities`
    pub recency_window: Duration,
    pub recency_boost: u64,
}

impl EntityTierConfig {
    pub fn posts() -> Self {
        Self {
            idle_window: Duration::hours(1),
            eviction: EvictionFraction::ONE_THIRD,
            recency_window: Duration::minutes(30),
            recency_boost: 5,
        }
    }

    pub fn users() -> Self {
        Self {
            idle_window: Duration::hours(2),
            eviction: EvictionFraction::ONE_QUARTER,
            recency_window: Duration::minutes(30),
            recency_boost: 5,
        }
    }
}

/// Configuration for every tier plus the maintenance cadence
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub tracker: TrackerConfig,
    pub blob: BlobTierConfig,
    pub data: DataTierConfig,
    pub posts: EntityTierConfig,
    pub users: EntityTierConfig,
    pub optimize_interval: std::time::Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            blob: BlobTierConfig::default(),
            data: DataTierConfig::default(),
            posts: EntityTierConfig::posts(),
            users: EntityTierConfig::users(),
            optimize_interval: std::time::Duration::from_secs(5 * 60),
        }
    }
}

impl CacheConfig {
    /// Parse configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let tracker = TrackerConfig {
            frequency_threshold: parse_env("FREQUENCY_THRESHOLD")
                .unwrap_or(defaults.tracker.frequency_threshold),
            ..defaults.tracker
        };

        let blob = BlobTierConfig {
            cache_dir: env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.blob.cache_dir),
            max_items: parse_env("BLOB_MAX_ITEMS").unwrap_or(defaults.blob.max_items),
            max_bytes: parse_env("BLOB_MAX_BYTES").unwrap_or(defaults.blob.max_bytes),
            idle_window: parse_env("BLOB_IDLE_SECS")
                .and_then(Duration::try_seconds)
                .unwrap_or(defaults.blob.idle_window),
            eviction: defaults.blob.eviction,
        };

        let data = DataTierConfig {
            max_items: parse_env("DATA_MAX_ITEMS").unwrap_or(defaults.data.max_items),
            max_bytes: parse_env("DATA_MAX_BYTES").unwrap_or(defaults.data.max_bytes),
            default_ttl: parse_env("DATA_DEFAULT_TTL_SECS")
                .and_then(Duration::try_seconds)
                .unwrap_or(defaults.data.default_ttl),
            eviction: defaults.data.eviction,
        };

        let posts = EntityTierConfig {
            idle_window: parse_env("POST_IDLE_SECS")
                .and_then(Duration::try_seconds)
                .unwrap_or(defaults.posts.idle_window),
            ..defaults.posts
        };

        let users = EntityTierConfig {
            idle_window: parse_env("USER_IDLE_SECS")
                .and_then(Duration::try_seconds)
                .unwrap_or(defaults.users.idle_window),
            ..defaults.users
        };

        let optimize_interval = parse_env("OPTIMIZE_INTERVAL_SECS")
            .map(std::time::Duration::from_secs)
            .unwrap_or(defaults.optimize_interval);

        Self {
            tracker,
            blob,
            data,
            posts,
            users,
            optimize_interval,
        }
    }
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}
