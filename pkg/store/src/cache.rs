use std::{num::NonZeroUsize, sync::Arc};

use lru::LruCache;
use parking_lot::Mutex;

use crate::Placements;

pub const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(128) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub capacity: usize,
    pub entries: usize,
    pub generation: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub flushes: u64,
    pub stale_inserts_skipped: u64,
}

struct CacheState {
    entries: LruCache<String, Placements>,
    generation: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    flushes: u64,
    stale_inserts_skipped: u64,
}

/// Bounded LRU memo of per-location lookups.
///
/// Every entry belongs to the registry generation the cache was last flushed
/// at. A result read from any other generation is refused by
/// [`LookupCache::insert`], so a lookup that raced a replace cannot park
/// pre-replace data in the cache after the flush.
pub struct LookupCache {
    state: Mutex<CacheState>,
}

impl LookupCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                generation: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                flushes: 0,
                stale_inserts_skipped: 0,
            }),
        }
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.state.lock().entries.cap()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the cached records for `location` and marks it most recently
    /// used.
    pub fn get(&self, location: &str) -> Option<Placements> {
        let mut state = self.state.lock();
        match state.entries.get(location).map(Arc::clone) {
            Some(placements) => {
                state.hits += 1;
                Some(placements)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Stores a lookup result read at registry `generation`. Returns `false`
    /// when the result predates the last flush and was dropped.
    pub fn insert(&self, location: &str, generation: u64, placements: Placements) -> bool {
        let mut state = self.state.lock();
        if generation != state.generation {
            state.stale_inserts_skipped += 1;
            return false;
        }
        if let Some((evicted, _)) = state.entries.push(location.to_string(), placements)
            && evicted != location
        {
            state.evictions += 1;
        }
        true
    }

    /// Empties the cache without changing the generation it accepts.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.flushes += 1;
    }

    /// Empties the cache and from now on accepts only results read at
    /// `generation` or later. Generations never move backwards, so flushes
    /// from overlapping replaces may arrive in any order.
    pub fn flush_to(&self, generation: u64) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.generation = state.generation.max(generation);
        state.flushes += 1;
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            capacity: state.entries.cap().get(),
            entries: state.entries.len(),
            generation: state.generation,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            flushes: state.flushes,
            stale_inserts_skipped: state.stale_inserts_skipped,
        }
    }
}

impl Default for LookupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}
