//! Expiry Sweeper: closes active reservations whose window has ended.
//!
//! Stateless logic over the arbiter's reservation set. Each candidate is
//! re-checked under its spot lock, so a sweep racing a cancel or payment
//! confirmation sees either the before or the after state, never a mix.

use crate::arbiter::ReservationArbiter;
use crate::types::{PaymentStatus, Reservation, ReservationStatus};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Outcome of one sweep
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Unpaid reservations moved to `expired`
    pub expired: usize,
    /// Paid reservations moved to `completed`
    pub completed: usize,
}

impl SweepReport {
    /// Total reservations transitioned
    #[must_use]
    pub const fn transitioned(&self) -> usize {
        self.expired + self.completed
    }

    /// Whether nothing happened
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.transitioned() == 0
    }
}

/// Closing status for a reservation whose window ended
#[must_use]
pub fn terminal_status(reservation: &Reservation) -> ReservationStatus {
    if reservation.payment_status == PaymentStatus::Paid {
        ReservationStatus::Completed
    } else {
        ReservationStatus::Expired
    }
}

/// Runs expiry passes over the arbiter's reservations
pub struct ExpirySweeper {
    arbiter: Arc<ReservationArbiter>,
}

impl ExpirySweeper {
    /// Creates a sweeper over `arbiter`
    #[must_use]
    pub const fn new(arbiter: Arc<ReservationArbiter>) -> Self {
        Self { arbiter }
    }

    /// Closes every active reservation with `now > end_time`.
    ///
    /// Always runs to completion over its candidate set. Running it twice
    /// with the same `now` transitions nothing the second time.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for (id, spot_id) in self.arbiter.due(now) {
            let Some(closed) = self.arbiter.close_if_due(id, &spot_id, now, terminal_status) else {
                continue;
            };
            let to = match closed.reservation.status {
                ReservationStatus::Completed => {
                    report.completed += 1;
                    "completed"
                }
                _ => {
                    report.expired += 1;
                    "expired"
                }
            };
            counter!("spotwatch_reservations_swept_total", "to" => to).increment(1);
            info!(
                reservation_id = %id,
                spot_id = %spot_id,
                status = to,
                released = closed.released,
                "Reservation closed by sweep"
            );
        }

        if !report.is_empty() {
            info!(
                expired = report.expired,
                completed = report.completed,
                "Expiry sweep finished"
            );
        }
        report
    }
}
