//! Change Notifier: turns reconciler and arbiter results into broadcast events.
//!
//! Derivation is pure. The only retained state is a bounded window of recently
//! published keys, so a retried operation does not announce the same
//! transition twice.
//!
//! The reconciler and arbiter publish while still holding the affected spot's
//! lock, so subscribers see each spot's transitions in the order they were
//! applied. Sinks therefore must not call back into the engine.

use crate::environment::NotificationSink;
use crate::reconciler::ReconcileOutcome;
use crate::types::{ReservationId, SpotId};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

/// Event pushed to subscribers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A sensor reading flipped occupancy
    SpotStatusChanged {
        /// Affected spot
        spot_id: SpotId,
        /// New occupancy
        occupied: bool,
        /// Sensor timestamp of the reading
        timestamp: DateTime<Utc>,
    },
    /// A reservation now holds the spot
    SpotReserved {
        /// Affected spot
        spot_id: SpotId,
        /// Holding reservation
        reservation_id: ReservationId,
    },
    /// A reservation stopped holding the spot
    SpotReleased {
        /// Affected spot
        spot_id: SpotId,
    },
}

impl Notification {
    /// The spot this notification concerns
    #[must_use]
    pub const fn spot_id(&self) -> &SpotId {
        match self {
            Self::SpotStatusChanged { spot_id, .. }
            | Self::SpotReserved { spot_id, .. }
            | Self::SpotReleased { spot_id } => spot_id,
        }
    }
}

/// Arbiter and sweeper results the notifier understands
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReservationEvent {
    /// A reservation was granted
    Reserved {
        /// Spot now held
        spot_id: SpotId,
        /// New reservation
        reservation_id: ReservationId,
    },
    /// A reservation released its spot (cancel, expiry or completion)
    Released {
        /// Spot freed
        spot_id: SpotId,
        /// Reservation that held it
        reservation_id: ReservationId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum DedupKey {
    Status(SpotId, bool, DateTime<Utc>),
    Reserved(ReservationId),
    Released(ReservationId),
}

/// Derives a notification from a reconcile outcome; only actual flips count
#[must_use]
pub fn from_reconcile(outcome: &ReconcileOutcome) -> Option<Notification> {
    let timestamp = outcome.spot.last_updated?;
    outcome.changed.then(|| Notification::SpotStatusChanged {
        spot_id: outcome.spot.id.clone(),
        occupied: outcome.spot.occupied,
        timestamp,
    })
}

/// Derives a notification from a reservation event
#[must_use]
pub fn from_reservation(event: &ReservationEvent) -> Notification {
    match event {
        ReservationEvent::Reserved {
            spot_id,
            reservation_id,
        } => Notification::SpotReserved {
            spot_id: spot_id.clone(),
            reservation_id: *reservation_id,
        },
        ReservationEvent::Released { spot_id, .. } => Notification::SpotReleased {
            spot_id: spot_id.clone(),
        },
    }
}

/// Publishes derived notifications with duplicate suppression
pub struct ChangeNotifier {
    sink: Arc<dyn NotificationSink>,
    window: usize,
    recent: Mutex<VecDeque<DedupKey>>,
}

impl ChangeNotifier {
    /// Creates a notifier remembering the last `window` keys
    #[must_use]
    pub fn new(sink: Arc<dyn NotificationSink>, window: usize) -> Self {
        Self {
            sink,
            window,
            recent: Mutex::new(VecDeque::with_capacity(window)),
        }
    }

    /// Publishes the status change carried by `outcome`, if any.
    ///
    /// Returns whether something was published.
    pub fn on_reconcile(&self, outcome: &ReconcileOutcome) -> bool {
        let Some(notification) = from_reconcile(outcome) else {
            return false;
        };
        let key = DedupKey::Status(
            outcome.spot.id.clone(),
            outcome.spot.occupied,
            outcome.spot.last_updated.unwrap_or_default(),
        );
        self.emit(key, notification)
    }

    /// Publishes the notification for a reservation event.
    ///
    /// Returns whether something was published.
    pub fn on_reservation(&self, event: &ReservationEvent) -> bool {
        let key = match event {
            ReservationEvent::Reserved { reservation_id, .. } => DedupKey::Reserved(*reservation_id),
            ReservationEvent::Released { reservation_id, .. } => DedupKey::Released(*reservation_id),
        };
        self.emit(key, from_reservation(event))
    }

    fn emit(&self, key: DedupKey, notification: Notification) -> bool {
        if self.window > 0 {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            if recent.contains(&key) {
                counter!("spotwatch_notifications_suppressed_total").increment(1);
                debug!(?notification, "Duplicate notification suppressed");
                return false;
            }
            if recent.len() == self.window {
                recent.pop_front();
            }
            recent.push_back(key);
        }

        counter!("spotwatch_notifications_published_total").increment(1);
        self.sink.publish(notification);
        true
    }
}

/// Sink fanning notifications out through a `tokio` broadcast channel.
///
/// Having no subscribers is not an error; slow subscribers see `Lagged`.
#[derive(Clone, Debug)]
pub struct BroadcastSink {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    /// Creates a channel buffering up to `capacity` notifications per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New subscriber receiving everything published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Current number of subscribers
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl NotificationSink for BroadcastSink {
    fn publish(&self, notification: Notification) {
        // Err only means nobody is listening.
        let _ = self.sender.send(notification);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::reconciler::ReadingDisposition;
    use crate::types::{Spot, SpotDefaults};

    fn outcome(changed: bool, occupied: bool, at: DateTime<Utc>) -> ReconcileOutcome {
        let mut spot = Spot::new(SpotId::new("P1"), &SpotDefaults::default(), at);
        spot.occupied = occupied;
        spot.last_updated = Some(at);
        ReconcileOutcome {
            changed,
            disposition: ReadingDisposition::Applied,
            previous_occupied: !occupied,
            spot,
        }
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(Notification::SpotReleased {
            spot_id: SpotId::new("P1"),
        })
        .unwrap();
        assert_eq!(json["type"], "spot_released");
        assert_eq!(json["spot_id"], "P1");
    }

    #[test]
    fn redundant_reading_derives_nothing() {
        assert!(from_reconcile(&outcome(false, true, Utc::now())).is_none());
        assert!(from_reconcile(&outcome(true, true, Utc::now())).is_some());
    }

    #[tokio::test]
    async fn replayed_transition_is_suppressed() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        let notifier = ChangeNotifier::new(Arc::new(sink), 4);
        let at = Utc::now();

        assert!(notifier.on_reconcile(&outcome(true, true, at)));
        assert!(!notifier.on_reconcile(&outcome(true, true, at)));
        assert!(notifier.on_reconcile(&outcome(true, false, at + chrono::Duration::seconds(1))));

        assert!(matches!(
            rx.recv().await.unwrap(),
            Notification::SpotStatusChanged { occupied: true, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            Notification::SpotStatusChanged { occupied: false, .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn window_evicts_oldest_key() {
        let notifier = ChangeNotifier::new(Arc::new(crate::environment::NullSink), 1);
        let first = ReservationEvent::Released {
            spot_id: SpotId::new("P1"),
            reservation_id: ReservationId::new(),
        };
        let second = ReservationEvent::Released {
            spot_id: SpotId::new("P2"),
            reservation_id: ReservationId::new(),
        };
        assert!(notifier.on_reservation(&first));
        assert!(!notifier.on_reservation(&first));
        assert!(notifier.on_reservation(&second));
        assert!(notifier.on_reservation(&first));
    }

    #[test]
    fn zero_window_disables_dedup() {
        let notifier = ChangeNotifier::new(Arc::new(crate::environment::NullSink), 0);
        let event = ReservationEvent::Reserved {
            spot_id: SpotId::new("P1"),
            reservation_id: ReservationId::new(),
        };
        assert!(notifier.on_reservation(&event));
        assert!(notifier.on_reservation(&event));
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let sink = BroadcastSink::new(1);
        assert_eq!(sink.receiver_count(), 0);
        sink.publish(Notification::SpotReleased { spot_id: SpotId::new("P1") });
    }
}
