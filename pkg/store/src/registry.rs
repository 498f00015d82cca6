use std::{collections::HashMap, str::FromStr, sync::Arc};

use parking_lot::{Mutex, RwLock};
use schema::PlacementRecord;

use crate::{Placements, StoreError};

/// How the registry mapping is guarded. Both modes give the same observable
/// results; they only differ in whether lookups can run in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistryLockMode {
    /// One mutex for readers and writers alike.
    Exclusive,
    /// Reader-writer lock; lookups share the read side.
    #[default]
    SharedRead,
}

impl RegistryLockMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exclusive => "exclusive",
            Self::SharedRead => "shared",
        }
    }
}

impl FromStr for RegistryLockMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "exclusive" | "mutex" => Ok(Self::Exclusive),
            "shared" | "rwlock" | "shared-read" => Ok(Self::SharedRead),
            other => Err(format!(
                "unknown registry lock mode '{other}' (expected 'exclusive' or 'shared')"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub generation: u64,
    pub record_count: usize,
    pub location_count: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    by_location: HashMap<String, Placements>,
    record_count: usize,
    generation: u64,
}

enum RegistryLock {
    Exclusive(Mutex<RegistryState>),
    SharedRead(RwLock<RegistryState>),
}

/// Canonical `location -> records` mapping. Only ever replaced as a whole.
pub struct PlacementRegistry {
    lock: RegistryLock,
    empty: Placements,
}

impl PlacementRegistry {
    pub fn new(mode: RegistryLockMode) -> Self {
        let state = RegistryState::default();
        let lock = match mode {
            RegistryLockMode::Exclusive => RegistryLock::Exclusive(Mutex::new(state)),
            RegistryLockMode::SharedRead => RegistryLock::SharedRead(RwLock::new(state)),
        };
        Self {
            lock,
            empty: Arc::from(Vec::new()),
        }
    }

    pub fn lock_mode(&self) -> RegistryLockMode {
        match self.lock {
            RegistryLock::Exclusive(_) => RegistryLockMode::Exclusive,
            RegistryLock::SharedRead(_) => RegistryLockMode::SharedRead,
        }
    }

    /// Installs `records` as the complete registry contents and returns the
    /// stats of the new state. Locations missing from `records` disappear.
    pub fn replace_all(&self, records: Vec<PlacementRecord>) -> Result<RegistryStats, StoreError> {
        let record_count = records.len();
        let by_location = group_by_location(records)?;
        let location_count = by_location.len();

        Ok(self.write(move |state| {
            state.by_location = by_location;
            state.record_count = record_count;
            state.generation += 1;
            RegistryStats {
                generation: state.generation,
                record_count,
                location_count,
            }
        }))
    }

    /// Records stored under `location`, empty when the key is absent.
    pub fn lookup_raw(&self, location: &str) -> Placements {
        self.lookup_at(location).1
    }

    /// Like [`Self::lookup_raw`], also returning the generation the read was
    /// served from.
    pub fn lookup_at(&self, location: &str) -> (u64, Placements) {
        self.read(|state| {
            let placements = state
                .by_location
                .get(location)
                .cloned()
                .unwrap_or_else(|| Arc::clone(&self.empty));
            (state.generation, placements)
        })
    }

    pub fn stats(&self) -> RegistryStats {
        self.read(|state| RegistryStats {
            generation: state.generation,
            record_count: state.record_count,
            location_count: state.by_location.len(),
        })
    }

    fn read<R>(&self, f: impl FnOnce(&RegistryState) -> R) -> R {
        match &self.lock {
            RegistryLock::Exclusive(lock) => f(&*lock.lock()),
            RegistryLock::SharedRead(lock) => f(&*lock.read()),
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut RegistryState) -> R) -> R {
        match &self.lock {
            RegistryLock::Exclusive(lock) => f(&mut *lock.lock()),
            RegistryLock::SharedRead(lock) => f(&mut *lock.write()),
        }
    }
}

impl Default for PlacementRegistry {
    fn default() -> Self {
        Self::new(RegistryLockMode::default())
    }
}

// Grouping happens before the write lock is taken so the critical section is
// only the swap. The map is sized for the worst case of one location per
// record; failing to allocate it is the one internal fault a replace reports.
fn group_by_location(
    records: Vec<PlacementRecord>,
) -> Result<HashMap<String, Placements>, StoreError> {
    let mut grouped: HashMap<String, Vec<PlacementRecord>> = HashMap::new();
    grouped
        .try_reserve(records.len())
        .map_err(|err| StoreError::Internal(format!("registry allocation failed: {err}")))?;
    for record in records {
        grouped
            .entry(record.location().to_string())
            .or_default()
            .push(record);
    }
    Ok(grouped
        .into_iter()
        .map(|(location, records)| (location, Placements::from(records)))
        .collect())
}
