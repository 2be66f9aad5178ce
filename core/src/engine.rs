//! The engine facade wiring registry, reconciler, arbiter, sweeper and
//! notifier together.
//!
//! Hosts hold one `ParkingEngine` behind an `Arc` and call it from any number
//! of tasks.

use crate::arbiter::ReservationArbiter;
use crate::config::EngineConfig;
use crate::environment::{Clock, NotificationSink, PaymentGateway};
use crate::error::Result;
use crate::notifier::ChangeNotifier;
use crate::reconciler::{EventReconciler, ReconcileOutcome};
use crate::registry::{OccupancySummary, ReadingRecord, SpotRegistry};
use crate::sweeper::{ExpirySweeper, SweepReport};
use crate::types::{
    PaymentIntentId, Reservation, ReservationGrant, ReservationId, ReservationRequest,
    SensorReading, Spot, SpotDefaults, SpotId,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Collaborators the engine depends on
#[derive(Clone)]
pub struct EngineEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Payment provider
    pub gateway: Arc<dyn PaymentGateway>,
    /// Broadcast destination
    pub sink: Arc<dyn NotificationSink>,
}

impl EngineEnvironment {
    /// Creates a new environment
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        gateway: Arc<dyn PaymentGateway>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            clock,
            gateway,
            sink,
        }
    }
}

/// Spot-state reconciliation and reservation coordination
pub struct ParkingEngine {
    registry: Arc<SpotRegistry>,
    reconciler: EventReconciler,
    arbiter: Arc<ReservationArbiter>,
    sweeper: ExpirySweeper,
    clock: Arc<dyn Clock>,
}

impl ParkingEngine {
    /// Builds an engine from its collaborators
    #[must_use]
    pub fn new(config: EngineConfig, env: EngineEnvironment) -> Self {
        let registry = Arc::new(SpotRegistry::new(Arc::clone(&env.clock)));
        let notifier = Arc::new(ChangeNotifier::new(env.sink, config.dedup_window));
        let reconciler = EventReconciler::new(Arc::clone(&registry), Arc::clone(&env.clock))
            .with_notifier(Arc::clone(&notifier));
        let arbiter = Arc::new(
            ReservationArbiter::new(
                Arc::clone(&registry),
                env.gateway,
                Arc::clone(&env.clock),
                config,
            )
            .with_notifier(notifier),
        );
        let sweeper = ExpirySweeper::new(Arc::clone(&arbiter));
        Self {
            registry,
            reconciler,
            arbiter,
            sweeper,
            clock: env.clock,
        }
    }

    /// Direct access to the spot table.
    ///
    /// Reservation holds cannot be lifted through it.
    #[must_use]
    pub fn registry(&self) -> &SpotRegistry {
        &self.registry
    }

    /// Applies a sensor reading and announces a resulting occupancy flip
    pub fn ingest(&self, reading: SensorReading) -> ReconcileOutcome {
        self.reconciler.apply(reading)
    }

    /// Registers a spot explicitly; existing spots are returned unchanged
    pub fn provision(&self, id: &SpotId, defaults: &SpotDefaults) -> Spot {
        self.registry.upsert(id, defaults)
    }

    /// Current state of a spot
    #[must_use]
    pub fn spot(&self, id: &SpotId) -> Option<Spot> {
        self.registry.get(id)
    }

    /// Every spot, sorted by id
    #[must_use]
    pub fn spots(&self) -> Vec<Spot> {
        self.registry.snapshot()
    }

    /// Available spots, optionally filtered
    #[must_use]
    pub fn available_spots(&self, level: Option<&str>, zone: Option<&str>) -> Vec<Spot> {
        self.registry.available(level, zone)
    }

    /// Most recent readings for a spot
    #[must_use]
    pub fn recent_readings(&self, id: &SpotId, limit: usize) -> Vec<ReadingRecord> {
        self.registry.recent_readings(id, limit)
    }

    /// Facility occupancy
    #[must_use]
    pub fn occupancy(&self) -> OccupancySummary {
        self.registry.occupancy_summary()
    }

    /// Requests a reservation
    ///
    /// # Errors
    ///
    /// See [`ReservationArbiter::create`].
    pub async fn reserve(&self, request: ReservationRequest) -> Result<ReservationGrant> {
        self.arbiter.create(request).await
    }

    /// Payment-confirmation callback
    ///
    /// # Errors
    ///
    /// See [`ReservationArbiter::confirm_payment`].
    pub fn confirm_payment(&self, intent_id: &PaymentIntentId) -> Result<Reservation> {
        self.arbiter.confirm_payment(intent_id)
    }

    /// Payment-failure callback
    ///
    /// # Errors
    ///
    /// See [`ReservationArbiter::record_payment_failure`].
    pub fn record_payment_failure(&self, intent_id: &PaymentIntentId) -> Result<Reservation> {
        self.arbiter.record_payment_failure(intent_id)
    }

    /// Cancels a reservation and announces the freed spot
    ///
    /// # Errors
    ///
    /// See [`ReservationArbiter::cancel`].
    pub async fn cancel(&self, id: ReservationId) -> Result<Reservation> {
        self.arbiter.cancel(id).await
    }

    /// Fetches a reservation
    #[must_use]
    pub fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.arbiter.get(id)
    }

    /// Reservation history for a spot
    #[must_use]
    pub fn reservations_for_spot(&self, spot_id: &SpotId) -> Vec<Reservation> {
        self.arbiter.reservations_for_spot(spot_id)
    }

    /// Expires or completes reservations due at `now`
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        self.sweeper.sweep(now)
    }

    /// Sweeps at the engine clock's current time
    pub fn sweep_now(&self) -> SweepReport {
        self.sweep(self.clock.now())
    }
}
