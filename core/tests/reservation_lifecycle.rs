//! End-to-end reservation lifecycle through the engine facade.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use chrono::Duration;
use spotwatch_core::config::EngineConfig;
use spotwatch_core::environment::Clock;
use spotwatch_core::error::{ErrorKind, GatewayError, ReservationError};
use spotwatch_core::notifier::Notification;
use spotwatch_core::types::{Money, PaymentStatus, ReservationStatus, SpotId};
use spotwatch_testing::helpers::reading;
use spotwatch_testing::mocks::GatewayBehavior;
use spotwatch_testing::TestHarness;
use std::sync::Arc;

fn spot(harness: &TestHarness, id: &str) -> spotwatch_core::types::Spot {
    harness.engine.spot(&SpotId::new(id)).expect("spot exists")
}

#[tokio::test]
async fn two_hour_reservation_costs_four_dollars() {
    let harness = TestHarness::new();
    harness.engine.ingest(reading("P1", false, harness.clock.now()));

    let request = harness.request("P1", 2.0);
    let grant = harness.engine.reserve(request).await.unwrap();

    let reservation = grant.reservation;
    assert_eq!(reservation.total_amount, Money::from_cents(400));
    assert!((reservation.total_amount.as_decimal() - 4.0).abs() < f64::EPSILON);
    assert_eq!(reservation.end_time, reservation.start_time + Duration::hours(2));

    let intents = harness.gateway.intent_requests();
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].amount, Money::from_cents(400));
    assert_eq!(intents[0].currency, "usd");
    assert_eq!(intents[0].metadata["reservation_id"], reservation.id.to_string());
    assert_eq!(intents[0].metadata["spot_id"], "P1");

    assert_eq!(
        harness.sink.notifications(),
        vec![Notification::SpotReserved {
            spot_id: SpotId::new("P1"),
            reservation_id: reservation.id,
        }]
    );
}

#[tokio::test]
async fn occupied_spot_is_unavailable() {
    let harness = TestHarness::new();
    harness.engine.ingest(reading("P1", true, harness.clock.now()));

    let err = harness.engine.reserve(harness.request("P1", 1.0)).await.unwrap_err();
    assert!(matches!(err, ReservationError::Unavailable { .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(harness.gateway.intent_requests().is_empty());
}

#[tokio::test]
async fn second_sequential_request_conflicts() {
    let harness = TestHarness::new();
    harness.provision(&["P1"]);
    harness.engine.reserve(harness.request("P1", 1.0)).await.unwrap();
    let err = harness.engine.reserve(harness.request("P1", 1.0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn gateway_error_releases_spot() {
    let harness = TestHarness::new();
    harness.provision(&["P1"]);
    harness
        .gateway
        .push(GatewayBehavior::Fail(GatewayError::Declined("card".into())));

    let err = harness.engine.reserve(harness.request("P1", 1.0)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalFailure);
    assert!(spot(&harness, "P1").is_available());
    let rolled_back = harness.engine.reservations_for_spot(&SpotId::new("P1"))[0].id;
    assert_eq!(
        harness.sink.notifications(),
        vec![
            Notification::SpotReserved {
                spot_id: SpotId::new("P1"),
                reservation_id: rolled_back,
            },
            Notification::SpotReleased { spot_id: SpotId::new("P1") },
        ]
    );

    // The spot is immediately reservable again.
    let grant = harness.engine.reserve(harness.request("P1", 1.0)).await.unwrap();
    assert_eq!(grant.reservation.status, ReservationStatus::Active);
}

#[tokio::test]
async fn registry_cannot_lift_reservation_hold() {
    let harness = TestHarness::new();
    harness.provision(&["P1"]);
    let first = harness.engine.reserve(harness.request("P1", 1.0)).await.unwrap();

    let held = harness.engine.registry().set_reserved(&SpotId::new("P1"), false).unwrap();
    assert!(held.reserved);

    let err = harness.engine.reserve(harness.request("P1", 1.0)).await.unwrap_err();
    assert!(matches!(err, ReservationError::Unavailable { .. }));
    let active: Vec<_> = harness
        .engine
        .reservations_for_spot(&SpotId::new("P1"))
        .into_iter()
        .filter(|r| r.status == ReservationStatus::Active)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, first.reservation.id);

    // Cancelling still releases normally.
    harness.engine.cancel(first.reservation.id).await.unwrap();
    assert!(spot(&harness, "P1").is_available());
}

#[tokio::test]
async fn gateway_timeout_rolls_back() {
    let config = EngineConfig::default().with_payment_timeout(std::time::Duration::from_millis(50));
    let harness = TestHarness::with_config(config);
    harness.provision(&["P1"]);
    harness.gateway.push(GatewayBehavior::Hang);

    let err = harness.engine.reserve(harness.request("P1", 1.0)).await.unwrap_err();
    assert_eq!(err, ReservationError::Payment(GatewayError::Timeout));
    assert!(spot(&harness, "P1").is_available());

    let history = harness.engine.reservations_for_spot(&SpotId::new("P1"));
    assert_eq!(history[0].status, ReservationStatus::Cancelled);
    assert_eq!(history[0].payment_status, PaymentStatus::Failed);
}

#[tokio::test]
async fn abandoned_request_rolls_back() {
    let harness = TestHarness::new();
    harness.provision(&["P1"]);
    harness.gateway.push(GatewayBehavior::Hang);

    let engine = Arc::clone(&harness.engine);
    let request = harness.request("P1", 1.0);
    let task = tokio::spawn(async move { engine.reserve(request).await });

    for _ in 0..100 {
        if spot(&harness, "P1").reserved {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(spot(&harness, "P1").reserved, "request should be awaiting payment");

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert!(spot(&harness, "P1").is_available());
}

#[tokio::test]
async fn confirm_then_cancel_refunds_and_releases() {
    let harness = TestHarness::new();
    harness.provision(&["P1"]);
    let grant = harness.engine.reserve(harness.request("P1", 3.0)).await.unwrap();
    let intent = grant.reservation.payment_intent_id.clone().unwrap();

    let paid = harness.engine.confirm_payment(&intent).unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert!(spot(&harness, "P1").reserved, "confirmation does not touch the spot");

    let cancelled = harness.engine.cancel(grant.reservation.id).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);
    assert_eq!(harness.gateway.refunds(), vec![(intent, Money::from_cents(600))]);
    assert!(!spot(&harness, "P1").reserved);

    assert_eq!(
        harness.sink.notifications().last(),
        Some(&Notification::SpotReleased { spot_id: SpotId::new("P1") })
    );
}

#[tokio::test]
async fn failed_refund_keeps_paid_status() {
    let harness = TestHarness::new();
    harness.provision(&["P1"]);
    harness
        .gateway
        .set_refund_behavior(GatewayBehavior::Fail(GatewayError::Unavailable("down".into())));
    let grant = harness.engine.reserve(harness.request("P1", 1.0)).await.unwrap();
    harness
        .engine
        .confirm_payment(grant.reservation.payment_intent_id.as_ref().unwrap())
        .unwrap();

    let cancelled = harness.engine.cancel(grant.reservation.id).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Paid);
    assert!(spot(&harness, "P1").is_available());
}

#[tokio::test]
async fn cancel_unknown_reservation_is_not_found() {
    let harness = TestHarness::new();
    let err = harness
        .engine
        .cancel(spotwatch_core::types::ReservationId::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn sweep_expires_unpaid_and_completes_paid() {
    let harness = TestHarness::new();
    harness.provision(&["P1", "P2", "P3"]);
    let unpaid = harness.engine.reserve(harness.request("P1", 1.0)).await.unwrap();
    let paid = harness.engine.reserve(harness.request("P2", 1.0)).await.unwrap();
    let long = harness.engine.reserve(harness.request("P3", 5.0)).await.unwrap();
    harness
        .engine
        .confirm_payment(paid.reservation.payment_intent_id.as_ref().unwrap())
        .unwrap();
    harness.sink.clear();

    harness.clock.advance(Duration::hours(2));
    let report = harness.engine.sweep_now();
    assert_eq!(report.expired, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.transitioned(), 2);

    let status = |id| harness.engine.reservation(id).unwrap().status;
    assert_eq!(status(unpaid.reservation.id), ReservationStatus::Expired);
    assert_eq!(status(paid.reservation.id), ReservationStatus::Completed);
    assert_eq!(status(long.reservation.id), ReservationStatus::Active);
    assert!(!spot(&harness, "P1").reserved);
    assert!(!spot(&harness, "P2").reserved);
    assert!(spot(&harness, "P3").reserved);
    assert_eq!(harness.sink.notifications().len(), 2);

    // Second sweep is a no-op.
    let again = harness.engine.sweep_now();
    assert!(again.is_empty());
    assert_eq!(harness.sink.notifications().len(), 2);
}

#[tokio::test]
async fn sweep_does_not_fire_at_exact_end_time() {
    let harness = TestHarness::new();
    harness.provision(&["P1"]);
    let grant = harness.engine.reserve(harness.request("P1", 1.0)).await.unwrap();
    let report = harness.engine.sweep(grant.reservation.end_time);
    assert!(report.is_empty());
    let report = harness.engine.sweep(grant.reservation.end_time + Duration::seconds(1));
    assert_eq!(report.expired, 1);
}

#[tokio::test]
async fn past_start_time_is_accepted_and_immediately_sweepable() {
    let harness = TestHarness::new();
    harness.provision(&["P1"]);
    let start = harness.clock.now() - Duration::hours(3);
    let request = spotwatch_testing::helpers::reservation_request("P1", start, 1.0);
    harness.engine.reserve(request).await.unwrap();

    let report = harness.engine.sweep_now();
    assert_eq!(report.expired, 1);
    assert!(spot(&harness, "P1").is_available());
}

#[tokio::test]
async fn cancelled_reservation_is_not_swept() {
    let harness = TestHarness::new();
    harness.provision(&["P1"]);
    let grant = harness.engine.reserve(harness.request("P1", 1.0)).await.unwrap();
    harness.engine.cancel(grant.reservation.id).await.unwrap();

    harness.clock.advance(Duration::hours(5));
    assert!(harness.engine.sweep_now().is_empty());
    assert_eq!(
        harness.engine.reservation(grant.reservation.id).unwrap().status,
        ReservationStatus::Cancelled
    );
}

#[tokio::test]
async fn payment_confirmed_after_expiry_is_recorded() {
    let harness = TestHarness::new();
    harness.provision(&["P1"]);
    let grant = harness.engine.reserve(harness.request("P1", 1.0)).await.unwrap();
    harness.clock.advance(Duration::hours(2));
    harness.engine.sweep_now();

    let late = harness
        .engine
        .confirm_payment(grant.reservation.payment_intent_id.as_ref().unwrap())
        .unwrap();
    assert_eq!(late.status, ReservationStatus::Expired);
    assert_eq!(late.payment_status, PaymentStatus::Paid);
    assert!(spot(&harness, "P1").is_available());
}

#[test]
fn status_change_notifications_follow_flips_only() {
    let harness = TestHarness::new();
    let t = harness.clock.now();
    harness.engine.ingest(reading("P1", false, t));
    harness.engine.ingest(reading("P1", true, t + Duration::seconds(1)));
    harness.engine.ingest(reading("P1", true, t + Duration::seconds(2)));
    harness.engine.ingest(reading("P1", false, t));

    let notifications = harness.sink.notifications();
    assert_eq!(
        notifications,
        vec![Notification::SpotStatusChanged {
            spot_id: SpotId::new("P1"),
            occupied: true,
            timestamp: t + Duration::seconds(1),
        }]
    );
}
