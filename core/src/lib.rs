//! # Spotwatch Core
//!
//! Spot-state reconciliation and reservation arbitration for sensor-equipped
//! parking facilities.
//!
//! The engine consumes out-of-order, possibly duplicated occupancy readings,
//! keeps authoritative per-spot state under last-writer-wins by sensor
//! timestamp, and grants reservations so that no spot is ever booked twice,
//! even under heavy concurrent demand.
//!
//! ## Components
//!
//! - [`registry::SpotRegistry`]: sharded spot table with per-key locking
//! - [`reconciler::EventReconciler`]: timestamp-ordered application of readings
//! - [`arbiter::ReservationArbiter`]: reservation lifecycle and mutual exclusion
//! - [`sweeper::ExpirySweeper`]: closes reservations whose window ended
//! - [`notifier::ChangeNotifier`]: derives and deduplicates broadcast events
//! - [`engine::ParkingEngine`]: the facade hosts talk to
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Dependency Injection via Environment
//! - Per-key serialization, never a global lock
//!
//! ## Example
//!
//! ```ignore
//! use spotwatch_core::prelude::*;
//!
//! let engine = ParkingEngine::new(EngineConfig::default(), env);
//! engine.ingest(SensorReading::new("PARK_001", false, Utc::now()));
//! let grant = engine.reserve(request).await?;
//! ```

pub mod arbiter;
pub mod config;
pub mod engine;
pub mod environment;
pub mod error;
pub mod notifier;
pub mod reconciler;
pub mod registry;
pub mod sweeper;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Everything a host usually needs
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{EngineEnvironment, ParkingEngine};
    pub use crate::environment::{
        Clock, GatewayFuture, GatewayResult, NotificationSink, NullSink, PaymentGateway,
        PaymentIntent, PaymentIntentRequest, SystemClock,
    };
    pub use crate::error::{ErrorKind, GatewayError, ReservationError};
    pub use crate::notifier::{BroadcastSink, Notification};
    pub use crate::reconciler::{ReadingDisposition, ReconcileOutcome};
    pub use crate::registry::{LevelOccupancy, OccupancySummary, ReadingRecord};
    pub use crate::sweeper::SweepReport;
    pub use crate::types::{
        Money, PaymentIntentId, PaymentStatus, Reservation, ReservationGrant, ReservationId,
        ReservationRequest, ReservationStatus, SensorReading, Spot, SpotDefaults, SpotId,
        SpotStatus, Telemetry,
    };
    pub use chrono::{DateTime, Utc};
}
