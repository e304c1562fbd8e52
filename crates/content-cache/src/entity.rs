//! Entity tiers
//!
//! Fully materialized domain objects keyed by their own identifier. These
//! tiers have no hard ceiling; they are bounded by the periodic idle sweep
//! and low-priority eviction only.

use crate::clock::{saturating_before, Clock};
use crate::config::{EntityTierConfig, TrackerConfig};
use crate::models::{Post, User};
use crate::tier::TierMap;
use crate::types::{CacheEntry, TierMetrics};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// A domain object that can be held by an [`EntityCache`]
pub trait CacheableEntity: Clone + Send + Sync + 'static {
    /// Identifier the entity is cached under
    fn cache_id(&self) -> &str;

    /// Blob URLs (images) the entity references
    fn blob_urls(&self) -> Vec<&str>;

    /// Rough in-memory footprint in bytes
    fn estimated_size(&self) -> usize;
}

pub struct EntityCache<E> {
    name: &'static str,
    state: Mutex<TierMap<E>>,
    clock: Arc<dyn Clock>,
    config: EntityTierConfig,
}

pub type PostCache = EntityCache<Post>;
pub type UserCache = EntityCache<User>;

impl<E: CacheableEntity> EntityCache<E> {
    pub fn new(
        name: &'static str,
        config: &EntityTierConfig,
        tracker: TrackerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name,
            state: Mutex::new(TierMap::new(tracker, config.eviction, None)),
            clock,
            config: config.clone(),
        }
    }

    /// Insert or replace by the entity's own id
    pub fn store(&self, entity: E) {
        let now = self.clock.now();
        let id = entity.cache_id().to_string();
        let size = entity.estimated_size();

        self.state
            .lock()
            .insert(&id, CacheEntry::new(entity, size, now), now);
        debug!(tier = self.name, id = %id, "Stored entity");
    }

    pub fn retrieve(&self, id: &str) -> Option<E> {
        let now = self.clock.now();
        let mut map = self.state.lock();

        match map.get(id).map(|entry| entry.value.clone()) {
            Some(entity) => {
                map.touch(id, now);
                map.counters_mut().hit();
                Some(entity)
            }
            None => {
                map.counters_mut().miss();
                debug!(tier = self.name, id, "Entity cache miss");
                None
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().get(id).is_some()
    }

    pub fn remove(&self, id: &str) -> bool {
        self.state.lock().remove(id).is_some()
    }

    /// Drop entities idle for longer than this tier's idle window
    pub fn clear_expired(&self) -> usize {
        let cutoff = saturating_before(self.clock.now(), self.config.idle_window);
        let removed = self.state.lock().clear_idle(cutoff);
        if removed > 0 {
            info!(tier = self.name, removed, "Cleared idle entities");
        }
        removed
    }

    pub fn clear_low_priority(&self) -> usize {
        let removed = self.state.lock().clear_low_priority();
        debug!(tier = self.name, removed, "Cleared low-priority entities");
        removed
    }

    /// Boost entities accessed within the recency window so that currently
    /// relevant content outlives the next low-priority sweep
    pub fn update_priorities(&self) -> usize {
        let cutoff = saturating_before(self.clock.now(), self.config.recency_window);
        let mut map = self.state.lock();

        let recent = map.tracker().accessed_since(cutoff);
        for id in &recent {
            map.boost(id, self.config.recency_boost);
        }
        recent.len()
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

    pub fn priority(&self, id: &str) -> Option<u64> {
        self.state
            .lock()
            .tracker()
            .get(id)
            .map(|record| record.priority)
    }

    pub fn metrics(&self) -> TierMetrics {
        self.state.lock().metrics(self.name)
    }
}
