//! Cache coordinator
//!
//! Owns every tier, runs periodic maintenance, reacts to memory pressure and
//! aggregates statistics. Construct one per application and share it behind
//! an `Arc`.

use crate::blob::MemoryBlobCache;
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::data::StructuredDataCache;
use crate::entity::{CacheableEntity, PostCache, UserCache};
use crate::error::Result;
use crate::loader::BlobLoader;
use crate::models::{Post, User};
use crate::types::{CacheReport, CacheStatistics, TierMetrics};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A structured record to warm into the data tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreloadRecord {
    pub key: String,
    pub value: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Everything a newly active user context wants warm
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreloadContext {
    pub users: Vec<User>,
    pub posts: Vec<Post>,
    pub blob_urls: Vec<String>,
    pub records: Vec<PreloadRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadSummary {
    pub users: usize,
    pub posts: usize,
    pub records: usize,
    pub blobs_loaded: usize,
    pub blobs_failed: usize,
}

/// Outcome of a blob prefetch batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchSummary {
    pub loaded: usize,
    pub failed: usize,
}

pub struct CacheCoordinator {
    blobs: MemoryBlobCache,
    data: StructuredDataCache,
    posts: PostCache,
    users: UserCache,
    loader: Arc<dyn BlobLoader>,
    clock: Arc<dyn Clock>,
    statistics: Mutex<CacheStatistics>,
    optimizing: AtomicBool,
}

/// Clears the in-progress flag even if an optimize run is cancelled
struct OptimizeGuard<'a>(&'a AtomicBool);

impl Drop for OptimizeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CacheCoordinator {
    pub fn new(config: &CacheConfig, loader: Arc<dyn BlobLoader>) -> Self {
        Self::with_clock(config, loader, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &CacheConfig,
        loader: Arc<dyn BlobLoader>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            blobs: MemoryBlobCache::new(&config.blob, config.tracker, clock.clone()),
            data: StructuredDataCache::new(&config.data, config.tracker, clock.clone()),
            posts: PostCache::new("posts", &config.posts, config.tracker, clock.clone()),
            users: UserCache::new("users", &config.users, config.tracker, clock.clone()),
            loader,
            clock,
            statistics: Mutex::new(CacheStatistics::default()),
            optimizing: AtomicBool::new(false),
        }
    }

    /// Prepare the persistent tier
    pub async fn init(&self) {
        self.blobs.init().await;
        info!(cache_dir = ?self.blobs.persistent().root(), "Cache coordinator ready");
    }

    pub fn blobs(&self) -> &MemoryBlobCache {
        &self.blobs
    }

    pub fn data(&self) -> &StructuredDataCache {
        &self.data
    }

    pub fn posts(&self) -> &PostCache {
        &self.posts
    }

    pub fn users(&self) -> &UserCache {
        &self.users
    }

    /// Blob for `url` from memory, disk or the injected loader
    pub async fn preload(&self, url: &str) -> Result<Bytes> {
        self.blobs.preload(url, self.loader.as_ref()).await
    }

    /// Memory-only blob lookup
    pub fn get(&self, url: &str) -> Option<Bytes> {
        self.blobs.get(url)
    }

    pub fn store<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.data.store(key, value, expiration)
    }

    pub fn retrieve<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data.retrieve(key)
    }

    /// Cache a post and prefetch the images it references
    pub async fn cache_post(&self, post: Post) -> PrefetchSummary {
        let urls = owned_urls(&post);
        self.posts.store(post);
        self.prefetch(urls).await
    }

    /// Cache a user and prefetch their avatar and banner
    pub async fn cache_user(&self, user: User) -> PrefetchSummary {
        let urls = owned_urls(&user);
        self.users.store(user);
        self.prefetch(urls).await
    }

    pub fn get_cached_post(&self, id: &str) -> Option<Post> {
        self.posts.retrieve(id)
    }

    pub fn get_cached_user(&self, id: &str) -> Option<User> {
        self.users.retrieve(id)
    }

    /// Load blobs concurrently; failures are logged, never returned
    async fn prefetch<I>(&self, urls: I) -> PrefetchSummary
    where
        I: IntoIterator<Item = String>,
    {
        let urls: Vec<String> = urls.into_iter().collect();
        let results = join_all(urls.iter().map(|url| self.preload(url))).await;

        let mut summary = PrefetchSummary::default();
        for (url, result) in urls.iter().zip(results) {
            match result {
                Ok(_) => summary.loaded += 1,
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to prefetch blob");
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Warm every tier for a newly active user context
    pub async fn preload_content(&self, context: PreloadContext) -> PreloadSummary {
        let mut summary = PreloadSummary::default();

        for record in &context.records {
            match self.data.store(&record.key, &record.value, record.expires_at) {
                Ok(()) => summary.records += 1,
                Err(e) => warn!(key = %record.key, error = %e, "Failed to warm record"),
            }
        }

        let mut urls: BTreeSet<String> = context.blob_urls.into_iter().collect();

        for user in context.users {
            urls.extend(owned_urls(&user));
            self.users.store(user);
            summary.users += 1;
        }

        for post in context.posts {
            urls.extend(owned_urls(&post));
            self.posts.store(post);
            summary.posts += 1;
        }

        let prefetched = self.prefetch(urls).await;
        summary.blobs_loaded = prefetched.loaded;
        summary.blobs_failed = prefetched.failed;

        info!(
            users = summary.users,
            posts = summary.posts,
            records = summary.records,
            blobs_loaded = summary.blobs_loaded,
            blobs_failed = summary.blobs_failed,
            "Preloaded content"
        );
        summary
    }

    /// Periodic maintenance: expire, compress hot items, re-weight entities,
    /// then recompute statistics. Returns `None` when another run is already
    /// in progress.
    pub async fn optimize_cache(&self) -> Option<CacheStatistics> {
        if self
            .optimizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Optimization already running, skipping");
            return None;
        }
        let _guard = OptimizeGuard(&self.optimizing);

        let expired = self.blobs.clear_expired()
            + self.data.clear_expired()
            + self.posts.clear_expired()
            + self.users.clear_expired();

        let compressed =
            self.blobs.compress_frequent_items().await + self.data.compress_frequent_items();

        let boosted = self.posts.update_priorities() + self.users.update_priorities();

        let statistics = self.refresh_statistics();
        info!(
            expired,
            compressed,
            boosted,
            total_items = statistics.total_items,
            total_size = statistics.total_size,
            hit_rate = statistics.hit_rate,
            "Cache optimized"
        );
        Some(statistics)
    }

    /// Evict the low-priority share of every tier immediately
    pub fn handle_memory_pressure(&self) -> CacheStatistics {
        let evicted = self.blobs.clear_low_priority()
            + self.data.clear_low_priority()
            + self.posts.clear_low_priority()
            + self.users.clear_low_priority();

        let statistics = self.refresh_statistics();
        warn!(
            evicted,
            remaining = statistics.total_items,
            "Memory pressure, evicted low-priority entries"
        );
        statistics
    }

    /// Reset every tier, including the persistent store
    pub async fn clear_all_caches(&self) -> CacheStatistics {
        self.blobs.clear().await;
        self.data.clear();
        self.posts.clear();
        self.users.clear();

        let statistics = self.refresh_statistics();
        info!("All caches cleared");
        statistics
    }

    /// Statistics as of the last optimize, pressure event, clear or report
    pub fn statistics(&self) -> CacheStatistics {
        self.statistics.lock().clone()
    }

    /// Fresh diagnostics snapshot
    pub async fn report(&self) -> CacheReport {
        let (tiers, statistics) = self.snapshot();
        *self.statistics.lock() = statistics.clone();

        CacheReport {
            statistics,
            tiers,
            disk: self.blobs.persistent_usage().await,
        }
    }

    fn snapshot(&self) -> (Vec<TierMetrics>, CacheStatistics) {
        let blob = self.blobs.metrics();
        let data = self.data.metrics();
        let posts = self.posts.metrics();
        let users = self.users.metrics();

        let statistics =
            CacheStatistics::from_metrics(&blob, &data, &posts, &users, self.clock.now());
        (vec![blob, data, posts, users], statistics)
    }

    fn refresh_statistics(&self) -> CacheStatistics {
        let (_, statistics) = self.snapshot();
        *self.statistics.lock() = statistics.clone();
        statistics
    }

    /// Run `optimize_cache` every `every`, starting one interval from now
    pub fn spawn_optimizer(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                self.optimize_cache().await;
            }
        })
    }

    /// Handle every memory-pressure notification sent on `signals`
    pub fn listen_for_memory_pressure(
        self: Arc<Self>,
        mut signals: mpsc::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while signals.recv().await.is_some() {
                self.handle_memory_pressure();
            }
            debug!("Memory pressure channel closed");
        })
    }
}

fn owned_urls<E: CacheableEntity>(entity: &E) -> Vec<String> {
    entity.blob_urls().into_iter().map(str::to_owned).collect()
}
