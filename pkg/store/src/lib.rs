pub mod cache;
pub mod registry;

use std::{num::NonZeroUsize, sync::Arc};

use schema::{PlacementRecord, ValidationError, validate_placements};
use serde_json::Value;
use tracing::{debug, info};

pub use cache::{CacheStats, DEFAULT_CACHE_CAPACITY, LookupCache};
pub use registry::{PlacementRegistry, RegistryLockMode, RegistryStats};

/// Records for one location, shared between the registry, the cache and
/// callers without copying.
pub type Placements = Arc<[PlacementRecord]>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether the caller supplied bad input, as opposed to an internal fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub cache_capacity: NonZeroUsize,
    pub lock_mode: RegistryLockMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            lock_mode: RegistryLockMode::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceStats {
    pub generation: u64,
    pub record_count: usize,
    pub location_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub registry: RegistryStats,
    pub cache: CacheStats,
}

/// The placement registry together with the lookup cache that fronts it.
///
/// Both locks are independent: a cache miss reads the registry, releases its
/// lock, then populates the cache. Every successful replace flushes the cache
/// once the new mapping is visible, and results read before that replace are
/// refused by the cache afterwards, so a lookup that starts after
/// [`PlacementStore::replace_all`] returns never sees pre-replace records.
pub struct PlacementStore {
    registry: PlacementRegistry,
    cache: LookupCache,
}

impl PlacementStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            registry: PlacementRegistry::new(config.lock_mode),
            cache: LookupCache::new(config.cache_capacity),
        }
    }

    pub fn config(&self) -> StoreConfig {
        StoreConfig {
            cache_capacity: self.cache.capacity(),
            lock_mode: self.registry.lock_mode(),
        }
    }

    /// Validates a decoded upload payload and, only if all of it is valid,
    /// installs it as the complete registry contents.
    pub fn replace_all(&self, payload: Value) -> Result<ReplaceStats, StoreError> {
        let records = validate_placements(payload)?;
        self.replace_records(records)
    }

    /// Installs already validated records as the complete registry contents.
    pub fn replace_records(
        &self,
        records: Vec<PlacementRecord>,
    ) -> Result<ReplaceStats, StoreError> {
        let swapped = self.registry.replace_all(records)?;
        self.cache.flush_to(swapped.generation);
        info!(
            generation = swapped.generation,
            records = swapped.record_count,
            locations = swapped.location_count,
            "placement registry replaced"
        );
        Ok(ReplaceStats {
            generation: swapped.generation,
            record_count: swapped.record_count,
            location_count: swapped.location_count,
        })
    }

    /// Cached lookup by location. The empty result means "no placements".
    pub fn lookup(&self, location: &str) -> Placements {
        if let Some(placements) = self.cache.get(location) {
            debug!(location, "placement cache hit");
            return placements;
        }

        let (generation, placements) = self.registry.lookup_at(location);
        let cached = self
            .cache
            .insert(location, generation, Arc::clone(&placements));
        debug!(location, generation, cached, "placement cache miss");
        placements
    }

    /// Uncached read straight from the registry.
    pub fn lookup_raw(&self, location: &str) -> Placements {
        self.registry.lookup_raw(location)
    }

    pub fn flush(&self) {
        self.cache.flush();
        debug!("placement cache flushed");
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            registry: self.registry.stats(),
            cache: self.cache.stats(),
        }
    }
}

impl Default for PlacementStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
