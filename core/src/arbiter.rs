//! Reservation Arbiter: grants, confirms and cancels reservations.
//!
//! # Concurrency
//!
//! The availability check and the marking of `spot.reserved` happen under the
//! spot's lock, so concurrent requests for the same spot are serialized and
//! exactly one can win. The payment call happens after the lock is released;
//! if it fails, times out, or the request is dropped mid-flight, a
//! compensating rollback cancels the reservation and frees the spot.
//!
//! `spot_reserved` and `spot_released` are published under the same spot lock
//! as the transition they announce. A hold that is rolled back is therefore
//! seen as reserved, then released.
//!
//! Lock order is always spot entry, then reservation book.

use crate::config::EngineConfig;
use crate::environment::{Clock, PaymentGateway, PaymentIntentRequest};
use crate::error::{GatewayError, ReservationError, Result};
use crate::notifier::{ChangeNotifier, ReservationEvent};
use crate::registry::{lock_entry, SpotEntry, SpotRegistry};
use crate::types::{
    parse_instant, Money, PaymentIntentId, PaymentStatus, Reservation, ReservationGrant,
    ReservationId, ReservationRequest, ReservationStatus, SpotId,
};
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::{info, warn};

/// Reservation records plus the secondary indexes
#[derive(Debug, Default)]
struct ReservationBook {
    by_id: HashMap<ReservationId, Reservation>,
    by_intent: HashMap<PaymentIntentId, ReservationId>,
    by_spot: HashMap<SpotId, Vec<ReservationId>>,
}

impl ReservationBook {
    fn insert(&mut self, reservation: Reservation) {
        self.by_spot
            .entry(reservation.spot_id.clone())
            .or_default()
            .push(reservation.id);
        self.by_id.insert(reservation.id, reservation);
    }
}

/// A reservation closed by the sweeper
#[derive(Clone, Debug, PartialEq)]
pub struct ClosedReservation {
    /// The reservation after the transition
    pub reservation: Reservation,
    /// Whether the spot was still held by it and got released
    pub released: bool,
}

/// Grants and manages reservations
pub struct ReservationArbiter {
    registry: Arc<SpotRegistry>,
    book: RwLock<ReservationBook>,
    gateway: Arc<dyn PaymentGateway>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    notifier: Option<Arc<ChangeNotifier>>,
}

/// Rolls a reservation back unless disarmed.
///
/// Covers the create path being dropped while it awaits the payment call.
struct RollbackGuard<'a> {
    arbiter: &'a ReservationArbiter,
    id: ReservationId,
    spot_id: SpotId,
    armed: bool,
}

impl RollbackGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.arbiter.roll_back(self.id, &self.spot_id);
        }
    }
}

fn rejected(err: ReservationError) -> ReservationError {
    counter!("spotwatch_reservations_rejected_total", "reason" => err.reason()).increment(1);
    err
}

impl ReservationArbiter {
    /// Creates an arbiter over `registry`
    #[must_use]
    pub fn new(
        registry: Arc<SpotRegistry>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            book: RwLock::new(ReservationBook::default()),
            gateway,
            clock,
            config,
            notifier: None,
        }
    }

    /// Publishes holds and releases through `notifier`
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Must be called with the spot's lock held
    fn announce(&self, event: &ReservationEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.on_reservation(event);
        }
    }

    fn announce_release(&self, spot_id: &SpotId, reservation_id: ReservationId) {
        self.announce(&ReservationEvent::Released {
            spot_id: spot_id.clone(),
            reservation_id,
        });
    }

    fn read_book(&self) -> RwLockReadGuard<'_, ReservationBook> {
        self.book.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_book(&self) -> RwLockWriteGuard<'_, ReservationBook> {
        self.book.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates the time window and prices it
    fn window(
        &self,
        request: &ReservationRequest,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>, Money)> {
        if request.user_email.trim().is_empty() {
            return Err(ReservationError::InvalidRequest(
                "user_email must not be empty".to_string(),
            ));
        }
        if !request.duration_hours.is_finite() || request.duration_hours <= 0.0 {
            return Err(ReservationError::InvalidRequest(format!(
                "duration_hours must be a positive number, got {}",
                request.duration_hours
            )));
        }
        let start = parse_instant(&request.start_time).ok_or_else(|| {
            ReservationError::InvalidRequest(format!(
                "start_time is not an ISO-8601 instant: {}",
                request.start_time
            ))
        })?;
        let out_of_range =
            || ReservationError::InvalidRequest("duration_hours is too large".to_string());
        #[allow(clippy::cast_possible_truncation)]
        let millis = (request.duration_hours * 3_600_000.0).round() as i64;
        let end = Duration::try_milliseconds(millis)
            .and_then(|span| start.checked_add_signed(span))
            .ok_or_else(out_of_range)?;
        let amount = self
            .config
            .hourly_rate
            .checked_mul_hours(request.duration_hours)
            .ok_or_else(out_of_range)?;
        Ok((start, end, amount))
    }

    /// Grants a reservation and opens its payment intent.
    ///
    /// Validation order: spot exists, spot available, request well-formed.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::SpotNotFound`] for unknown spots
    /// - [`ReservationError::Unavailable`] when occupied or already reserved
    /// - [`ReservationError::InvalidRequest`] for bad duration, start time or email
    /// - [`ReservationError::Payment`] when the payment collaborator fails or
    ///   times out; the reservation is rolled back first
    pub async fn create(&self, request: ReservationRequest) -> Result<ReservationGrant> {
        let spot_id = request.spot_id.clone();
        let entry = self
            .registry
            .entry(&spot_id)
            .ok_or_else(|| rejected(ReservationError::SpotNotFound(spot_id.clone())))?;

        let reservation = {
            let mut guard = lock_entry(&entry);
            if !guard.spot.is_available() {
                return Err(rejected(ReservationError::Unavailable { spot_id }));
            }
            let (start_time, end_time, total_amount) = self.window(&request).map_err(rejected)?;
            let now = self.clock.now();
            let reservation = Reservation {
                id: ReservationId::new(),
                spot_id: spot_id.clone(),
                user_email: request.user_email,
                user_phone: request.user_phone,
                start_time,
                end_time,
                duration_hours: request.duration_hours,
                total_amount,
                payment_status: PaymentStatus::Pending,
                payment_intent_id: None,
                status: ReservationStatus::Active,
                created_at: now,
                updated_at: now,
            };
            guard.spot.reserved = true;
            guard.active_reservation = Some(reservation.id);
            self.write_book().insert(reservation.clone());
            self.announce(&ReservationEvent::Reserved {
                spot_id: spot_id.clone(),
                reservation_id: reservation.id,
            });
            reservation
        };

        info!(
            reservation_id = %reservation.id,
            spot_id = %spot_id,
            amount = %reservation.total_amount,
            end_time = %reservation.end_time,
            "Spot reserved, requesting payment intent"
        );

        let rollback = RollbackGuard {
            arbiter: self,
            id: reservation.id,
            spot_id: spot_id.clone(),
            armed: true,
        };

        let intent_request = PaymentIntentRequest {
            amount: reservation.total_amount,
            currency: self.config.currency.clone(),
            metadata: BTreeMap::from([
                ("reservation_id".to_string(), reservation.id.to_string()),
                ("spot_id".to_string(), spot_id.to_string()),
            ]),
        };
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.config.payment_timeout,
            self.gateway.create_intent(intent_request),
        )
        .await;
        histogram!("spotwatch_payment_gateway_duration_seconds").record(started.elapsed().as_secs_f64());

        let intent = match result {
            Ok(Ok(intent)) => intent,
            Ok(Err(err)) => {
                warn!(reservation_id = %reservation.id, spot_id = %spot_id, error = %err, "Payment intent failed");
                drop(rollback);
                return Err(rejected(err.into()));
            }
            Err(_) => {
                warn!(reservation_id = %reservation.id, spot_id = %spot_id, timeout = ?self.config.payment_timeout, "Payment intent timed out");
                drop(rollback);
                return Err(rejected(GatewayError::Timeout.into()));
            }
        };
        rollback.disarm();

        let reservation = {
            let _spot = lock_entry(&entry);
            let mut book = self.write_book();
            book.by_intent.insert(intent.id.clone(), reservation.id);
            match book.by_id.get_mut(&reservation.id) {
                Some(stored) => {
                    stored.payment_intent_id = Some(intent.id.clone());
                    stored.clone()
                }
                None => reservation,
            }
        };

        counter!("spotwatch_reservations_created_total").increment(1);
        info!(
            reservation_id = %reservation.id,
            spot_id = %spot_id,
            payment_intent_id = %intent.id,
            "Reservation created"
        );

        Ok(ReservationGrant {
            reservation,
            client_secret: intent.client_secret,
        })
    }

    /// Compensating action for a failed payment call
    fn roll_back(&self, id: ReservationId, spot_id: &SpotId) {
        let Some(entry) = self.registry.entry(spot_id) else {
            return;
        };
        let mut guard = lock_entry(&entry);
        let mut book = self.write_book();
        if let Some(reservation) = book.by_id.get_mut(&id) {
            if reservation.status == ReservationStatus::Active {
                reservation.status = ReservationStatus::Cancelled;
                reservation.payment_status = PaymentStatus::Failed;
                reservation.updated_at = self.clock.now();
            }
        }
        let released = guard.release(id);
        drop(book);
        if released {
            self.announce_release(spot_id, id);
        }
        drop(guard);
        counter!("spotwatch_reservations_rolled_back_total").increment(1);
        warn!(reservation_id = %id, spot_id = %spot_id, released, "Reservation rolled back");
    }

    fn locate_by_intent(&self, intent_id: &PaymentIntentId) -> Result<(ReservationId, SpotId)> {
        let book = self.read_book();
        book.by_intent
            .get(intent_id)
            .and_then(|id| book.by_id.get(id))
            .map(|r| (r.id, r.spot_id.clone()))
            .ok_or_else(|| ReservationError::PaymentIntentNotFound(intent_id.clone()))
    }

    fn locate(&self, id: ReservationId) -> Result<SpotId> {
        self.read_book()
            .by_id
            .get(&id)
            .map(|r| r.spot_id.clone())
            .ok_or(ReservationError::ReservationNotFound(id))
    }

    /// Applies `update` to a reservation under its spot lock.
    ///
    /// If `update` released the spot, `spot_released` is published before the
    /// spot lock is dropped.
    fn with_reservation<T>(
        &self,
        id: ReservationId,
        spot_id: &SpotId,
        update: impl FnOnce(&mut SpotEntry, &mut Reservation) -> Result<T>,
    ) -> Result<T> {
        let entry = self
            .registry
            .entry(spot_id)
            .ok_or_else(|| ReservationError::SpotNotFound(spot_id.clone()))?;
        let mut guard = lock_entry(&entry);
        let held = guard.active_reservation == Some(id);
        let result = {
            let mut book = self.write_book();
            let reservation = book
                .by_id
                .get_mut(&id)
                .ok_or(ReservationError::ReservationNotFound(id))?;
            update(&mut *guard, reservation)
        };
        if held && guard.active_reservation != Some(id) {
            self.announce_release(spot_id, id);
        }
        result
    }

    /// Marks the reservation behind `intent_id` as paid.
    ///
    /// Idempotent; the spot is untouched.
    ///
    /// # Errors
    ///
    /// [`ReservationError::PaymentIntentNotFound`] if no reservation carries the handle.
    pub fn confirm_payment(&self, intent_id: &PaymentIntentId) -> Result<Reservation> {
        let (id, spot_id) = self.locate_by_intent(intent_id)?;
        let now = self.clock.now();
        self.with_reservation(id, &spot_id, |_, reservation| {
            match reservation.payment_status {
                PaymentStatus::Paid => {}
                PaymentStatus::Refunded => {
                    warn!(reservation_id = %id, "Confirmation for refunded reservation ignored");
                }
                PaymentStatus::Pending | PaymentStatus::Failed => {
                    reservation.payment_status = PaymentStatus::Paid;
                    reservation.updated_at = now;
                    counter!("spotwatch_payment_confirmed_total").increment(1);
                    if reservation.status == ReservationStatus::Active {
                        info!(reservation_id = %id, spot_id = %spot_id, "Payment confirmed");
                    } else {
                        warn!(reservation_id = %id, status = %reservation.status, "Payment confirmed for inactive reservation");
                    }
                }
            }
            Ok(reservation.clone())
        })
    }

    /// Records a failed charge. The reservation stays active until it is
    /// cancelled or swept.
    ///
    /// # Errors
    ///
    /// [`ReservationError::PaymentIntentNotFound`] if no reservation carries the handle.
    pub fn record_payment_failure(&self, intent_id: &PaymentIntentId) -> Result<Reservation> {
        let (id, spot_id) = self.locate_by_intent(intent_id)?;
        let now = self.clock.now();
        self.with_reservation(id, &spot_id, |_, reservation| {
            if reservation.payment_status == PaymentStatus::Pending {
                reservation.payment_status = PaymentStatus::Failed;
                reservation.updated_at = now;
                warn!(reservation_id = %id, spot_id = %spot_id, "Payment failed");
            }
            Ok(reservation.clone())
        })
    }

    /// Cancels an active reservation and frees its spot.
    ///
    /// A paid reservation is refunded through the gateway; a failed refund is
    /// logged and leaves `payment_status = paid`.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::ReservationNotFound`] for unknown ids
    /// - [`ReservationError::InvalidTransition`] unless the reservation is active
    pub async fn cancel(&self, id: ReservationId) -> Result<Reservation> {
        let spot_id = self.locate(id)?;
        let now = self.clock.now();
        let cancelled = self.with_reservation(id, &spot_id, |entry, reservation| {
            if reservation.status != ReservationStatus::Active {
                return Err(ReservationError::InvalidTransition {
                    id,
                    status: reservation.status,
                    operation: "cancel",
                });
            }
            reservation.status = ReservationStatus::Cancelled;
            reservation.updated_at = now;
            entry.release(id);
            Ok(reservation.clone())
        })?;

        counter!("spotwatch_reservations_cancelled_total").increment(1);
        info!(reservation_id = %id, spot_id = %spot_id, "Reservation cancelled");

        let refundable = cancelled.payment_status == PaymentStatus::Paid;
        let Some(intent_id) = cancelled.payment_intent_id.clone().filter(|_| refundable) else {
            return Ok(cancelled);
        };

        let refund = tokio::time::timeout(
            self.config.payment_timeout,
            self.gateway.refund(intent_id.clone(), cancelled.total_amount),
        )
        .await
        .unwrap_or(Err(GatewayError::Timeout));

        match refund {
            Ok(()) => {
                let now = self.clock.now();
                self.with_reservation(id, &spot_id, |_, reservation| {
                    reservation.payment_status = PaymentStatus::Refunded;
                    reservation.updated_at = now;
                    info!(reservation_id = %id, payment_intent_id = %intent_id, "Payment refunded");
                    Ok(reservation.clone())
                })
            }
            Err(err) => {
                warn!(reservation_id = %id, payment_intent_id = %intent_id, error = %err, "Refund failed");
                Ok(cancelled)
            }
        }
    }

    /// Fetches a reservation
    #[must_use]
    pub fn get(&self, id: ReservationId) -> Option<Reservation> {
        self.read_book().by_id.get(&id).cloned()
    }

    /// Every reservation ever made for a spot, oldest first
    #[must_use]
    pub fn reservations_for_spot(&self, spot_id: &SpotId) -> Vec<Reservation> {
        let book = self.read_book();
        book.by_spot
            .get(spot_id)
            .map(|ids| ids.iter().filter_map(|id| book.by_id.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    /// Active reservations whose window ended before `now`
    #[must_use]
    pub fn due(&self, now: DateTime<Utc>) -> Vec<(ReservationId, SpotId)> {
        self.read_book()
            .by_id
            .values()
            .filter(|r| r.status == ReservationStatus::Active && now > r.end_time)
            .map(|r| (r.id, r.spot_id.clone()))
            .collect()
    }

    /// Closes a reservation if it is still active and due at `now`.
    ///
    /// `terminal` picks the closing status. Returns `None` when the
    /// reservation was already closed or is no longer due, which makes
    /// repeated sweeps no-ops.
    pub fn close_if_due(
        &self,
        id: ReservationId,
        spot_id: &SpotId,
        now: DateTime<Utc>,
        terminal: impl FnOnce(&Reservation) -> ReservationStatus,
    ) -> Option<ClosedReservation> {
        self.with_reservation(id, spot_id, |entry, reservation| {
            if reservation.status != ReservationStatus::Active || now <= reservation.end_time {
                return Ok(None);
            }
            reservation.status = terminal(reservation);
            reservation.updated_at = now;
            let released = entry.release(id);
            Ok(Some(ClosedReservation {
                reservation: reservation.clone(),
                released,
            }))
        })
        .ok()
        .flatten()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::environment::{GatewayFuture, PaymentIntent, SystemClock};
    use crate::error::ErrorKind;
    use crate::types::SpotDefaults;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingGateway {
        calls: AtomicUsize,
    }

    impl PaymentGateway for CountingGateway {
        fn create_intent(&self, _request: PaymentIntentRequest) -> GatewayFuture<PaymentIntent> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Ok(PaymentIntent {
                    id: PaymentIntentId::new(format!("pi_{n}")),
                    client_secret: format!("pi_{n}_secret"),
                })
            })
        }

        fn refund(&self, _intent_id: PaymentIntentId, _amount: Money) -> GatewayFuture<()> {
            Box::pin(async { Ok(()) })
        }
    }

    struct FailingGateway;

    impl PaymentGateway for FailingGateway {
        fn create_intent(&self, _request: PaymentIntentRequest) -> GatewayFuture<PaymentIntent> {
            Box::pin(async { Err(GatewayError::Unavailable("offline".into())) })
        }

        fn refund(&self, _intent_id: PaymentIntentId, _amount: Money) -> GatewayFuture<()> {
            Box::pin(async { Err(GatewayError::Unavailable("offline".into())) })
        }
    }

    fn arbiter(gateway: Arc<dyn PaymentGateway>) -> (Arc<SpotRegistry>, ReservationArbiter) {
        let registry = Arc::new(SpotRegistry::new(Arc::new(SystemClock)));
        registry.upsert(&SpotId::new("P1"), &SpotDefaults::default());
        let arbiter = ReservationArbiter::new(
            Arc::clone(&registry),
            gateway,
            Arc::new(SystemClock),
            EngineConfig::default(),
        );
        (registry, arbiter)
    }

    fn request(duration_hours: f64) -> ReservationRequest {
        ReservationRequest {
            spot_id: SpotId::new("P1"),
            user_email: "driver@example.com".to_string(),
            user_phone: None,
            start_time: "2030-01-01T10:00:00Z".to_string(),
            duration_hours,
        }
    }

    #[tokio::test]
    async fn prices_two_hours_at_default_rate() {
        let (registry, arbiter) = arbiter(Arc::new(CountingGateway::default()));
        let grant = arbiter.create(request(2.0)).await.unwrap();
        let reservation = &grant.reservation;
        assert_eq!(reservation.total_amount, Money::from_cents(400));
        assert_eq!(reservation.end_time - reservation.start_time, Duration::hours(2));
        assert_eq!(reservation.status, ReservationStatus::Active);
        assert_eq!(reservation.payment_status, PaymentStatus::Pending);
        assert_eq!(reservation.payment_intent_id, Some(PaymentIntentId::new("pi_0")));
        assert_eq!(grant.client_secret, "pi_0_secret");
        assert!(registry.get(&SpotId::new("P1")).unwrap().reserved);
    }

    #[tokio::test]
    async fn validation_order_reports_unavailable_before_invalid() {
        let (registry, arbiter) = arbiter(Arc::new(CountingGateway::default()));
        registry.set_occupied(&SpotId::new("P1"), true, Utc::now());
        let err = arbiter.create(request(-1.0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let mut unknown = request(1.0);
        unknown.spot_id = SpotId::new("missing");
        assert_eq!(arbiter.create(unknown).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn invalid_requests_leave_spot_untouched() {
        let (registry, arbiter) = arbiter(Arc::new(CountingGateway::default()));
        let mut bad_start = request(1.0);
        bad_start.start_time = "not a time".to_string();
        let mut no_email = request(1.0);
        no_email.user_email = "  ".to_string();
        for bad in [request(0.0), request(f64::INFINITY), bad_start, no_email] {
            let err = arbiter.create(bad).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert!(registry.get(&SpotId::new("P1")).unwrap().is_available());
        assert!(arbiter.reservations_for_spot(&SpotId::new("P1")).is_empty());
    }

    #[tokio::test]
    async fn gateway_failure_rolls_back() {
        let (registry, arbiter) = arbiter(Arc::new(FailingGateway));
        let err = arbiter.create(request(1.0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalFailure);
        assert!(registry.get(&SpotId::new("P1")).unwrap().is_available());
        let history = arbiter.reservations_for_spot(&SpotId::new("P1"));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ReservationStatus::Cancelled);
        assert_eq!(history[0].payment_status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn confirm_is_idempotent_and_cancel_refunds() {
        let (registry, arbiter) = arbiter(Arc::new(CountingGateway::default()));
        let grant = arbiter.create(request(1.0)).await.unwrap();
        let intent = grant.reservation.payment_intent_id.clone().unwrap();

        let paid = arbiter.confirm_payment(&intent).unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert_eq!(arbiter.confirm_payment(&intent).unwrap().payment_status, PaymentStatus::Paid);

        let cancelled = arbiter.cancel(grant.reservation.id).await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);
        assert!(!registry.get(&SpotId::new("P1")).unwrap().reserved);

        let again = arbiter.cancel(grant.reservation.id).await.unwrap_err();
        assert!(matches!(again, ReservationError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn payment_failure_keeps_reservation_active() {
        let (_, arbiter) = arbiter(Arc::new(CountingGateway::default()));
        let grant = arbiter.create(request(1.0)).await.unwrap();
        let intent = grant.reservation.payment_intent_id.unwrap();
        let failed = arbiter.record_payment_failure(&intent).unwrap();
        assert_eq!(failed.payment_status, PaymentStatus::Failed);
        assert_eq!(failed.status, ReservationStatus::Active);

        let unknown = arbiter.confirm_payment(&PaymentIntentId::new("pi_unknown"));
        assert_eq!(unknown.unwrap_err().kind(), ErrorKind::NotFound);
    }
}
