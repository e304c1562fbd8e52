//! Multi-tier content cache
//!
//! Keeps images, structured records and feed entities close at hand while
//! bounding memory:
//!
//! - [`MemoryBlobCache`]: bounded in-memory blobs backed by a
//!   [`file_blob_store::BlobStore`]
//! - [`StructuredDataCache`]: bounded JSON records with explicit expiry
//! - [`PostCache`] / [`UserCache`]: domain objects pruned by idle time and
//!   priority
//! - [`CacheCoordinator`]: owns the tiers, runs maintenance and reacts to
//!   memory pressure
//!
//! Every tier keys eviction off an [`AccessTracker`] priority that blends
//! recency and frequency.

mod blob;
mod clock;
mod config;
mod coordinator;
mod data;
mod entity;
mod error;
mod loader;
mod models;
mod tier;
mod tracker;
mod types;

#[cfg(test)]
mod test_support;

pub use blob::MemoryBlobCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BlobTierConfig, CacheConfig, DataTierConfig, EntityTierConfig, TrackerConfig};
pub use coordinator::{
    CacheCoordinator, PrefetchSummary, PreloadContext, PreloadRecord, PreloadSummary,
};
pub use data::StructuredDataCache;
pub use entity::{CacheableEntity, EntityCache, PostCache, UserCache};
pub use error::{CacheError, LoadError, Result};
pub use loader::BlobLoader;
pub use models::{Post, User};
pub use tracker::{AccessRecord, AccessTracker, EvictionFraction};
pub use types::{CacheEntry, CacheReport, CacheStatistics, TierCounters, TierMetrics};

pub use file_blob_store::StoreUsage;
