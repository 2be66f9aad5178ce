//! Spot Registry: the authoritative map of spot identity to current state.
//!
//! The table is split into a fixed number of shards. A shard lock is only held
//! long enough to find or insert an entry; all mutation of a spot happens under
//! that spot's own `Mutex`, so writers on different keys never contend and two
//! writers on the same key are totally ordered.
//!
//! Guards are never held across an `.await`.

use crate::environment::Clock;
use crate::types::{ReservationId, SensorReading, Spot, SpotDefaults, SpotId, SpotStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{info, warn};

const SHARD_COUNT: usize = 16;

type Shard = HashMap<SpotId, Arc<Mutex<SpotEntry>>>;

/// A reading as archived in a spot's history
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReadingRecord {
    /// The reading exactly as received
    pub reading: SensorReading,
    /// When the engine received it
    pub received_at: DateTime<Utc>,
    /// `false` when the reading was stale and only archived
    pub applied: bool,
}

/// Everything guarded by a spot's lock
#[derive(Clone, Debug)]
pub struct SpotEntry {
    /// Current state
    pub spot: Spot,
    /// Append-only reading history, in arrival order
    pub history: Vec<ReadingRecord>,
    /// The reservation currently holding the spot, if any
    pub active_reservation: Option<ReservationId>,
}

impl SpotEntry {
    fn new(spot: Spot) -> Self {
        Self {
            spot,
            history: Vec::new(),
            active_reservation: None,
        }
    }

    /// Clears the reserved flag if `reservation` is the one holding the spot.
    ///
    /// Returns whether the spot was released.
    pub fn release(&mut self, reservation: ReservationId) -> bool {
        if self.active_reservation == Some(reservation) {
            self.active_reservation = None;
            self.spot.reserved = false;
            true
        } else {
            false
        }
    }
}

/// Locks a spot entry, recovering from poisoning.
///
/// Every critical section leaves the entry consistent before doing anything
/// fallible, so a poisoned lock still guards valid data.
pub(crate) fn lock_entry(entry: &Mutex<SpotEntry>) -> MutexGuard<'_, SpotEntry> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Occupancy counts for one level
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LevelOccupancy {
    /// Spots on the level
    pub total: usize,
    /// Spots with a vehicle present
    pub occupied: usize,
    /// Spots held by a reservation (and not occupied)
    pub reserved: usize,
    /// Free spots
    pub available: usize,
    /// `occupied / total * 100`, two decimals
    pub occupancy_rate: f64,
}

impl LevelOccupancy {
    fn count(&mut self, status: SpotStatus) {
        self.total += 1;
        match status {
            SpotStatus::Occupied => self.occupied += 1,
            SpotStatus::Reserved => self.reserved += 1,
            SpotStatus::Available => self.available += 1,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(&mut self) {
        self.occupancy_rate = if self.total == 0 {
            0.0
        } else {
            let rate = self.occupied as f64 / self.total as f64 * 100.0;
            (rate * 100.0).round() / 100.0
        };
    }
}

/// Facility-wide occupancy
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OccupancySummary {
    /// Totals across every level
    pub overall: LevelOccupancy,
    /// Per-level breakdown, keyed by level name
    pub by_level: BTreeMap<String, LevelOccupancy>,
}

/// Sharded, per-key-serialized spot table
pub struct SpotRegistry {
    shards: [RwLock<Shard>; SHARD_COUNT],
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SpotRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotRegistry")
            .field("spots", &self.len())
            .finish_non_exhaustive()
    }
}

impl SpotRegistry {
    /// Creates an empty registry
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            shards: std::array::from_fn(|_| RwLock::new(HashMap::new())),
            clock,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn shard(&self, id: &SpotId) -> &RwLock<Shard> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.shards[(hasher.finish() % SHARD_COUNT as u64) as usize]
    }

    /// Looks up the lock guarding `id`
    #[must_use]
    pub(crate) fn entry(&self, id: &SpotId) -> Option<Arc<Mutex<SpotEntry>>> {
        self.shard(id)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Looks up the lock guarding `id`, creating the spot if it is unknown
    pub(crate) fn entry_or_create(&self, id: &SpotId, defaults: &SpotDefaults) -> Arc<Mutex<SpotEntry>> {
        if let Some(entry) = self.entry(id) {
            return entry;
        }
        let mut shard = self
            .shard(id)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Another writer may have won between the read and write locks.
        Arc::clone(shard.entry(id.clone()).or_insert_with(|| {
            let spot = Spot::new(id.clone(), defaults, self.clock.now());
            info!(spot_id = %id, location = %spot.location, level = %spot.level, zone = %spot.zone, "Spot created");
            Arc::new(Mutex::new(SpotEntry::new(spot)))
        }))
    }

    /// Current state of a spot, `None` if it was never seen
    #[must_use]
    pub fn get(&self, id: &SpotId) -> Option<Spot> {
        self.entry(id).map(|entry| lock_entry(&entry).spot.clone())
    }

    /// Returns the spot, creating it from `defaults` if absent.
    ///
    /// Idempotent on identity: an existing spot keeps its descriptive fields.
    pub fn upsert(&self, id: &SpotId, defaults: &SpotDefaults) -> Spot {
        let entry = self.entry_or_create(id, defaults);
        lock_entry(&entry).spot.clone()
    }

    /// Overwrites occupancy without timestamp arbitration.
    ///
    /// Sensor input goes through the reconciler instead; this is for
    /// administrative corrections. Returns `None` for unknown spots.
    pub fn set_occupied(&self, id: &SpotId, occupied: bool, at: DateTime<Utc>) -> Option<Spot> {
        let entry = self.entry(id)?;
        let mut guard = lock_entry(&entry);
        guard.spot.occupied = occupied;
        guard.spot.last_updated = Some(at);
        Some(guard.spot.clone())
    }

    /// Places or lifts an administrative hold. Returns `None` for unknown spots.
    ///
    /// A spot held by an active reservation is left untouched: only cancel,
    /// rollback or expiry release it. The returned spot is the state after the
    /// call.
    pub fn set_reserved(&self, id: &SpotId, reserved: bool) -> Option<Spot> {
        let entry = self.entry(id)?;
        let mut guard = lock_entry(&entry);
        if let Some(holder) = guard.active_reservation {
            if !reserved {
                warn!(spot_id = %id, reservation_id = %holder, "Refusing to lift hold owned by a reservation");
            }
            return Some(guard.spot.clone());
        }
        guard.spot.reserved = reserved;
        Some(guard.spot.clone())
    }

    fn entries(&self) -> Vec<Arc<Mutex<SpotEntry>>> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Every known spot, sorted by id
    #[must_use]
    pub fn snapshot(&self) -> Vec<Spot> {
        let mut spots: Vec<Spot> = self
            .entries()
            .iter()
            .map(|entry| lock_entry(entry).spot.clone())
            .collect();
        spots.sort_by(|a, b| a.id.cmp(&b.id));
        spots
    }

    /// Available spots, optionally filtered by level and zone
    #[must_use]
    pub fn available(&self, level: Option<&str>, zone: Option<&str>) -> Vec<Spot> {
        self.snapshot()
            .into_iter()
            .filter(Spot::is_available)
            .filter(|spot| level.is_none_or(|level| spot.level == level))
            .filter(|spot| zone.is_none_or(|zone| spot.zone == zone))
            .collect()
    }

    /// Most recent readings for a spot, newest sensor timestamp first
    #[must_use]
    pub fn recent_readings(&self, id: &SpotId, limit: usize) -> Vec<ReadingRecord> {
        let Some(entry) = self.entry(id) else {
            return Vec::new();
        };
        let mut history = lock_entry(&entry).history.clone();
        history.sort_by(|a, b| b.reading.timestamp.cmp(&a.reading.timestamp));
        history.truncate(limit);
        history
    }

    /// Occupancy totals and per-level breakdown
    #[must_use]
    pub fn occupancy_summary(&self) -> OccupancySummary {
        let mut summary = OccupancySummary::default();
        for spot in self.snapshot() {
            let status = spot.status();
            summary.overall.count(status);
            summary.by_level.entry(spot.level).or_default().count(status);
        }
        summary.overall.finish();
        summary.by_level.values_mut().for_each(LevelOccupancy::finish);
        summary
    }

    /// Number of known spots
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Whether no spot has been seen yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
