//! Event Reconciler: applies sensor readings under last-writer-wins by
//! sensor timestamp.
//!
//! Arrival order is irrelevant. A reading at least as new as the spot's
//! `last_updated` is applied (ties go to the incoming reading, which makes
//! replays idempotent); an older one is archived and otherwise ignored.

use crate::environment::Clock;
use crate::notifier::ChangeNotifier;
use crate::registry::{lock_entry, ReadingRecord, SpotEntry, SpotRegistry};
use crate::types::{SensorReading, Spot};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// What happened to a reading
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingDisposition {
    /// Became the spot's current state
    Applied,
    /// Older than the spot's state; archived only
    Stale,
}

/// Result of reconciling one reading
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileOutcome {
    /// Occupancy flipped value
    pub changed: bool,
    /// Applied or stale
    pub disposition: ReadingDisposition,
    /// Occupancy before the reading
    pub previous_occupied: bool,
    /// Spot state after the reading
    pub spot: Spot,
}

impl ReconcileOutcome {
    /// Whether the reading was archived without being applied
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.disposition == ReadingDisposition::Stale
    }
}

/// Applies `reading` to a locked entry.
///
/// Always appends to history. Only flips `changed` when occupancy actually
/// changes value.
pub fn reconcile(
    entry: &mut SpotEntry,
    reading: SensorReading,
    received_at: DateTime<Utc>,
) -> ReconcileOutcome {
    let previous_occupied = entry.spot.occupied;
    let fresh = entry
        .spot
        .last_updated
        .is_none_or(|last| reading.timestamp >= last);

    if fresh {
        entry.spot.occupied = reading.occupied;
        entry.spot.last_updated = Some(reading.timestamp);
    }

    entry.history.push(ReadingRecord {
        reading,
        received_at,
        applied: fresh,
    });

    ReconcileOutcome {
        changed: fresh && previous_occupied != entry.spot.occupied,
        disposition: if fresh {
            ReadingDisposition::Applied
        } else {
            ReadingDisposition::Stale
        },
        previous_occupied,
        spot: entry.spot.clone(),
    }
}

/// Feeds sensor readings into the registry
pub struct EventReconciler {
    registry: Arc<SpotRegistry>,
    clock: Arc<dyn Clock>,
    notifier: Option<Arc<ChangeNotifier>>,
}

impl EventReconciler {
    /// Creates a reconciler over `registry`
    #[must_use]
    pub fn new(registry: Arc<SpotRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            clock,
            notifier: None,
        }
    }

    /// Publishes occupancy flips through `notifier`
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Applies a reading, creating the spot on first sight
    pub fn apply(&self, reading: SensorReading) -> ReconcileOutcome {
        let entry = self
            .registry
            .entry_or_create(&reading.sensor_id, &reading.placement);
        let received_at = self.clock.now();
        let timestamp = reading.timestamp;

        let outcome = {
            let mut guard = lock_entry(&entry);
            let outcome = reconcile(&mut guard, reading, received_at);
            if let Some(notifier) = &self.notifier {
                notifier.on_reconcile(&outcome);
            }
            outcome
        };

        let spot_id = &outcome.spot.id;
        match outcome.disposition {
            ReadingDisposition::Applied => {
                counter!("spotwatch_readings_total", "outcome" => "applied").increment(1);
                if outcome.changed {
                    counter!("spotwatch_spot_transitions_total").increment(1);
                    info!(
                        spot_id = %spot_id,
                        occupied = outcome.spot.occupied,
                        %timestamp,
                        "Spot occupancy changed"
                    );
                } else {
                    debug!(spot_id = %spot_id, %timestamp, "Redundant reading");
                }
            }
            ReadingDisposition::Stale => {
                counter!("spotwatch_readings_total", "outcome" => "stale").increment(1);
                debug!(
                    spot_id = %spot_id,
                    %timestamp,
                    last_updated = ?outcome.spot.last_updated,
                    "Stale reading archived"
                );
            }
        }

        outcome
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::environment::SystemClock;
    use crate::types::{SpotDefaults, SpotId};
    use chrono::Duration;

    fn entry() -> SpotEntry {
        let spot = Spot::new(SpotId::new("P1"), &SpotDefaults::default(), Utc::now());
        SpotEntry {
            spot,
            history: Vec::new(),
            active_reservation: None,
        }
    }

    #[test]
    fn first_reading_always_applies() {
        let mut entry = entry();
        let t = Utc::now() - Duration::days(365);
        let outcome = reconcile(&mut entry, SensorReading::new("P1", true, t), Utc::now());
        assert!(outcome.changed);
        assert_eq!(outcome.disposition, ReadingDisposition::Applied);
        assert_eq!(entry.spot.last_updated, Some(t));
    }

    #[test]
    fn replay_is_idempotent() {
        let mut entry = entry();
        let reading = SensorReading::new("P1", true, Utc::now());
        assert!(reconcile(&mut entry, reading.clone(), Utc::now()).changed);
        let before = entry.spot.clone();
        let second = reconcile(&mut entry, reading, Utc::now());
        assert!(!second.changed);
        assert_eq!(second.disposition, ReadingDisposition::Applied);
        assert_eq!(entry.spot, before);
        assert_eq!(entry.history.len(), 2);
    }

    #[test]
    fn stale_reading_is_archived_not_applied() {
        let mut entry = entry();
        let t = Utc::now();
        reconcile(&mut entry, SensorReading::new("P1", true, t), t);
        let stale = reconcile(
            &mut entry,
            SensorReading::new("P1", false, t - Duration::seconds(1)),
            t,
        );
        assert!(stale.is_stale());
        assert!(!stale.changed);
        assert!(entry.spot.occupied);
        assert_eq!(entry.spot.last_updated, Some(t));
        assert!(!entry.history.last().unwrap().applied);
    }

    #[test]
    fn apply_creates_spot_from_placement() {
        let registry = Arc::new(SpotRegistry::new(Arc::new(SystemClock)));
        let reconciler = EventReconciler::new(Arc::clone(&registry), Arc::new(SystemClock));
        let reading = SensorReading::new("PARK_007", false, Utc::now())
            .with_placement(SpotDefaults::new("Level_2_Spot_B3", "L2", "B"));
        let outcome = reconciler.apply(reading);
        assert!(!outcome.changed);
        let spot = registry.get(&SpotId::new("PARK_007")).unwrap();
        assert_eq!(spot.level, "L2");
        assert_eq!(spot.location, "Level_2_Spot_B3");
        assert_eq!(registry.recent_readings(&spot.id, 10).len(), 1);
    }
}
