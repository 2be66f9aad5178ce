//! Property tests for timestamp-ordered reconciliation.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use proptest::prelude::*;
use spotwatch_core::environment::SystemClock;
use spotwatch_core::reconciler::EventReconciler;
use spotwatch_core::registry::SpotRegistry;
use spotwatch_core::types::{SensorReading, SpotId};
use spotwatch_testing::properties::readings;
use std::sync::Arc;

fn reconciler() -> (Arc<SpotRegistry>, EventReconciler) {
    let registry = Arc::new(SpotRegistry::new(Arc::new(SystemClock)));
    let reconciler = EventReconciler::new(Arc::clone(&registry), Arc::new(SystemClock));
    (registry, reconciler)
}

/// The reading that must win: newest timestamp, latest arrival among ties
fn expected_winner(batch: &[SensorReading]) -> &SensorReading {
    let newest = batch.iter().map(|r| r.timestamp).max().unwrap();
    batch.iter().rev().find(|r| r.timestamp == newest).unwrap()
}

proptest! {
    #[test]
    fn final_state_is_newest_reading(batch in readings("P1", 40)) {
        let (registry, reconciler) = reconciler();
        for reading in batch.clone() {
            reconciler.apply(reading);
        }
        let spot = registry.get(&SpotId::new("P1")).unwrap();
        let winner = expected_winner(&batch);
        prop_assert_eq!(spot.occupied, winner.occupied);
        prop_assert_eq!(spot.last_updated, Some(winner.timestamp));
    }

    #[test]
    fn every_reading_is_archived(batch in readings("P1", 40)) {
        let (registry, reconciler) = reconciler();
        for reading in batch.clone() {
            reconciler.apply(reading);
        }
        let history = registry.recent_readings(&SpotId::new("P1"), usize::MAX);
        prop_assert_eq!(history.len(), batch.len());
        for pair in history.windows(2) {
            prop_assert!(pair[0].reading.timestamp >= pair[1].reading.timestamp);
        }
    }

    #[test]
    fn immediate_duplicate_changes_nothing(batch in readings("P1", 20)) {
        let (registry, reconciler) = reconciler();
        for reading in batch {
            reconciler.apply(reading.clone());
            let before = registry.get(&SpotId::new("P1")).unwrap();
            let outcome = reconciler.apply(reading);
            prop_assert!(!outcome.changed);
            prop_assert_eq!(registry.get(&SpotId::new("P1")).unwrap(), before);
        }
    }

    #[test]
    fn stale_readings_never_flip(batch in readings("P1", 40)) {
        let (_, reconciler) = reconciler();
        for reading in batch {
            let outcome = reconciler.apply(reading);
            if outcome.is_stale() {
                prop_assert!(!outcome.changed);
                prop_assert_eq!(outcome.spot.occupied, outcome.previous_occupied);
            }
        }
    }
}
