//! Engine behaviour behind the resilient payment decorator.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use spotwatch_core::config::EngineConfig;
use spotwatch_core::engine::{EngineEnvironment, ParkingEngine};
use spotwatch_core::environment::Clock;
use spotwatch_core::error::{ErrorKind, GatewayError, ReservationError};
use spotwatch_core::types::{SpotDefaults, SpotId};
use spotwatch_runtime::circuit_breaker::{CircuitBreakerConfig, State};
use spotwatch_runtime::payment::ResilientGateway;
use spotwatch_testing::helpers::reservation_request;
use spotwatch_testing::mocks::{GatewayBehavior, ManualClock, RecordingSink, ScriptedPaymentGateway};
use std::sync::Arc;
use std::time::Duration;

struct Setup {
    engine: ParkingEngine,
    clock: Arc<ManualClock>,
    provider: Arc<ScriptedPaymentGateway>,
    gateway: Arc<ResilientGateway>,
}

fn setup(failure_threshold: usize) -> Setup {
    let clock = Arc::new(ManualClock::default());
    let provider = Arc::new(ScriptedPaymentGateway::default());
    let gateway = Arc::new(ResilientGateway::new(
        Arc::clone(&provider) as _,
        CircuitBreakerConfig::builder()
            .failure_threshold(failure_threshold)
            .timeout(Duration::from_secs(60))
            .build(),
        Duration::from_millis(50),
    ));
    let engine = ParkingEngine::new(
        EngineConfig::default(),
        EngineEnvironment::new(
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::clone(&gateway) as _,
            Arc::new(RecordingSink::new()),
        ),
    );
    engine.provision(&SpotId::new("P1"), &SpotDefaults::default());
    Setup {
        engine,
        clock,
        provider,
        gateway,
    }
}

#[tokio::test]
async fn open_circuit_fails_fast_and_releases_spot() {
    let setup = setup(2);
    setup
        .provider
        .set_default(GatewayBehavior::Fail(GatewayError::Unavailable("503".into())));

    for _ in 0..2 {
        let request = reservation_request("P1", setup.clock.now(), 1.0);
        let err = setup.engine.reserve(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalFailure);
    }
    assert_eq!(setup.gateway.breaker().state(), State::Open);

    let request = reservation_request("P1", setup.clock.now(), 1.0);
    let err = setup.engine.reserve(request).await.unwrap_err();
    assert_eq!(err, ReservationError::Payment(GatewayError::CircuitOpen));
    assert_eq!(setup.provider.intent_requests().len(), 2, "open circuit skips the provider");
    assert!(setup.engine.spot(&SpotId::new("P1")).unwrap().is_available());
}

#[tokio::test]
async fn provider_timeout_trips_breaker() {
    let setup = setup(1);
    setup.provider.push(GatewayBehavior::Hang);

    let request = reservation_request("P1", setup.clock.now(), 1.0);
    let err = setup.engine.reserve(request).await.unwrap_err();
    assert_eq!(err, ReservationError::Payment(GatewayError::Timeout));
    assert_eq!(setup.gateway.breaker().state(), State::Open);
}

#[tokio::test]
async fn refund_survives_transient_blip() {
    let setup = setup(10);
    let request = reservation_request("P1", setup.clock.now(), 2.0);
    let grant = setup.engine.reserve(request).await.unwrap();
    setup
        .engine
        .confirm_payment(grant.reservation.payment_intent_id.as_ref().unwrap())
        .unwrap();

    setup
        .provider
        .set_refund_behavior(GatewayBehavior::Fail(GatewayError::Unavailable("blip".into())));
    let provider = Arc::clone(&setup.provider);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        provider.set_refund_behavior(GatewayBehavior::Succeed);
    });

    let cancelled = setup.engine.cancel(grant.reservation.id).await.unwrap();
    assert_eq!(
        cancelled.payment_status,
        spotwatch_core::types::PaymentStatus::Refunded
    );
    assert!(setup.provider.refunds().len() >= 2);
}
