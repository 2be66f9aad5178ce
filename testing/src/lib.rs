//! # Spotwatch Testing
//!
//! Testing utilities and helpers for the Spotwatch engine.
//!
//! This crate provides:
//! - Mock implementations of Environment traits
//! - Test helpers and builders
//! - Property-based testing utilities
//!
//! ## Example
//!
//! ```ignore
//! use spotwatch_testing::helpers::{reading, TestHarness};
//!
//! #[tokio::test]
//! async fn reserves_free_spot() {
//!     let harness = TestHarness::new();
//!     harness.engine.ingest(reading("P1", false, harness.clock.now()));
//!     let grant = harness.engine.reserve(harness.request("P1", 2.0)).await.unwrap();
//!     assert_eq!(grant.reservation.total_amount.cents(), 400);
//! }
//! ```

use chrono::{DateTime, Utc};
use spotwatch_core::environment::Clock;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use spotwatch_core::environment::{
        GatewayFuture, NotificationSink, PaymentGateway, PaymentIntent, PaymentIntentRequest,
    };
    use spotwatch_core::error::GatewayError;
    use spotwatch_core::notifier::Notification;
    use spotwatch_core::types::{Money, PaymentIntentId};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use spotwatch_testing::mocks::FixedClock;
    /// use spotwatch_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when told to
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Starts the clock at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Moves the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jumps to an absolute instant
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(test_clock().now())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// What the scripted gateway does on a call
    #[derive(Debug, Clone)]
    pub enum GatewayBehavior {
        /// Answer successfully
        Succeed,
        /// Answer successfully after a delay
        Delay(Duration),
        /// Answer with this error
        Fail(GatewayError),
        /// Never answer
        Hang,
    }

    /// Payment gateway with scripted answers and call recording.
    ///
    /// Queued behaviors are consumed in order; once the queue is empty every
    /// call uses the default behavior.
    #[derive(Debug)]
    pub struct ScriptedPaymentGateway {
        default: Mutex<GatewayBehavior>,
        script: Mutex<VecDeque<GatewayBehavior>>,
        refund_behavior: Mutex<GatewayBehavior>,
        intents: Mutex<Vec<PaymentIntentRequest>>,
        refunds: Mutex<Vec<(PaymentIntentId, Money)>>,
        counter: AtomicUsize,
    }

    impl Default for ScriptedPaymentGateway {
        fn default() -> Self {
            Self::new(GatewayBehavior::Succeed)
        }
    }

    impl ScriptedPaymentGateway {
        /// Gateway using `default` for every unscripted call
        #[must_use]
        pub fn new(default: GatewayBehavior) -> Self {
            Self {
                default: Mutex::new(default),
                script: Mutex::new(VecDeque::new()),
                refund_behavior: Mutex::new(GatewayBehavior::Succeed),
                intents: Mutex::new(Vec::new()),
                refunds: Mutex::new(Vec::new()),
                counter: AtomicUsize::new(0),
            }
        }

        /// Gateway failing every call with `error`
        #[must_use]
        pub fn failing(error: GatewayError) -> Self {
            Self::new(GatewayBehavior::Fail(error))
        }

        /// Queues the behavior for the next unscripted call
        pub fn push(&self, behavior: GatewayBehavior) {
            self.script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(behavior);
        }

        /// Replaces the default behavior
        pub fn set_default(&self, behavior: GatewayBehavior) {
            *self.default.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
        }

        /// Sets how refunds answer
        pub fn set_refund_behavior(&self, behavior: GatewayBehavior) {
            *self
                .refund_behavior
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = behavior;
        }

        /// Every intent request received so far
        #[must_use]
        pub fn intent_requests(&self) -> Vec<PaymentIntentRequest> {
            self.intents
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Every refund requested so far
        #[must_use]
        pub fn refunds(&self) -> Vec<(PaymentIntentId, Money)> {
            self.refunds
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        fn next_behavior(&self) -> GatewayBehavior {
            self.script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .unwrap_or_else(|| {
                    self.default
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone()
                })
        }
    }

    async fn perform<T>(behavior: GatewayBehavior, value: T) -> Result<T, GatewayError> {
        match behavior {
            GatewayBehavior::Succeed => Ok(value),
            GatewayBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            GatewayBehavior::Fail(error) => Err(error),
            GatewayBehavior::Hang => futures::future::pending().await,
        }
    }

    impl PaymentGateway for ScriptedPaymentGateway {
        fn create_intent(&self, request: PaymentIntentRequest) -> GatewayFuture<PaymentIntent> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            self.intents
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request);
            let behavior = self.next_behavior();
            let intent = PaymentIntent {
                id: PaymentIntentId::new(format!("pi_test_{n}")),
                client_secret: format!("pi_test_{n}_secret"),
            };
            Box::pin(perform(behavior, intent))
        }

        fn refund(&self, intent_id: PaymentIntentId, amount: Money) -> GatewayFuture<()> {
            self.refunds
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((intent_id, amount));
            let behavior = self
                .refund_behavior
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            Box::pin(perform(behavior, ()))
        }
    }

    /// Sink keeping every notification it receives
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        received: Mutex<Vec<Notification>>,
    }

    impl RecordingSink {
        /// Creates an empty sink
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Notifications received so far, in order
        #[must_use]
        pub fn notifications(&self) -> Vec<Notification> {
            self.received
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Forgets everything received
        pub fn clear(&self) {
            self.received
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    impl NotificationSink for RecordingSink {
        fn publish(&self, notification: Notification) {
            self.received
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification);
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use super::mocks::{ManualClock, RecordingSink, ScriptedPaymentGateway};
    use super::{Clock, DateTime, Utc};
    use spotwatch_core::config::EngineConfig;
    use spotwatch_core::engine::{EngineEnvironment, ParkingEngine};
    use spotwatch_core::types::{ReservationRequest, SensorReading, SpotDefaults, SpotId};
    use std::sync::Arc;

    /// Reading with no telemetry
    #[must_use]
    pub fn reading(sensor_id: &str, occupied: bool, at: DateTime<Utc>) -> SensorReading {
        SensorReading::new(sensor_id, occupied, at)
    }

    /// Reservation request for `hours` starting at `start`
    #[must_use]
    pub fn reservation_request(spot_id: &str, start: DateTime<Utc>, hours: f64) -> ReservationRequest {
        ReservationRequest {
            spot_id: SpotId::new(spot_id),
            user_email: "driver@example.com".to_string(),
            user_phone: Some("+15550100".to_string()),
            start_time: start.to_rfc3339(),
            duration_hours: hours,
        }
    }

    /// Engine wired to inspectable doubles
    pub struct TestHarness {
        /// Engine under test
        pub engine: Arc<ParkingEngine>,
        /// Controls engine time
        pub clock: Arc<ManualClock>,
        /// Scripted payment collaborator
        pub gateway: Arc<ScriptedPaymentGateway>,
        /// Captures notifications
        pub sink: Arc<RecordingSink>,
    }

    impl Default for TestHarness {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestHarness {
        /// Harness with default engine configuration
        #[must_use]
        pub fn new() -> Self {
            Self::with_config(EngineConfig::default())
        }

        /// Harness with a custom configuration
        #[must_use]
        pub fn with_config(config: EngineConfig) -> Self {
            let clock = Arc::new(ManualClock::default());
            let gateway = Arc::new(ScriptedPaymentGateway::default());
            let sink = Arc::new(RecordingSink::new());
            let env = EngineEnvironment::new(
                Arc::clone(&clock) as Arc<dyn Clock>,
                Arc::clone(&gateway) as _,
                Arc::clone(&sink) as _,
            );
            Self {
                engine: Arc::new(ParkingEngine::new(config, env)),
                clock,
                gateway,
                sink,
            }
        }

        /// Provisions free spots with level `L1`, zone `A`
        pub fn provision(&self, ids: &[&str]) {
            for id in ids {
                self.engine
                    .provision(&SpotId::new(*id), &SpotDefaults::new(*id, "L1", "A"));
            }
        }

        /// Request starting at the harness's current time
        #[must_use]
        pub fn request(&self, spot_id: &str, hours: f64) -> ReservationRequest {
            reservation_request(spot_id, self.clock.now(), hours)
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use super::{DateTime, Utc};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use spotwatch_core::types::SensorReading;

    /// A reading for `sensor_id` within a day of 2025-01-01
    pub fn reading(sensor_id: &'static str) -> impl Strategy<Value = SensorReading> {
        (any::<bool>(), 0_i64..86_400).prop_map(move |(occupied, offset)| {
            SensorReading::new(sensor_id, occupied, base_time() + chrono::Duration::seconds(offset))
        })
    }

    /// A batch of readings for one sensor, in arbitrary arrival order
    pub fn readings(
        sensor_id: &'static str,
        max: usize,
    ) -> impl Strategy<Value = Vec<SensorReading>> {
        prop::collection::vec(reading(sensor_id), 1..max)
    }

    /// Fixed epoch the generated timestamps are offset from
    #[must_use]
    pub fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default()
    }
}

// Re-export commonly used items
pub use helpers::TestHarness;
pub use mocks::{FixedClock, ManualClock, RecordingSink, ScriptedPaymentGateway, test_clock};
