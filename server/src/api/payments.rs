//! Payment callback endpoints.
//!
//! The payment provider (or the client after completing checkout) reports
//! the outcome of an intent here.
//!
//! - POST /api/payments/confirm - intent succeeded
//! - POST /api/payments/failed - intent failed

use super::reservations::ReservationResponse;
use crate::error::AppError;
use crate::server::state::AppState;
use axum::{Json, extract::State};
use serde::Deserialize;
use spotwatch_core::types::PaymentIntentId;

/// Payment outcome callback body
#[derive(Debug, Deserialize)]
pub struct PaymentCallback {
    /// Intent the outcome applies to
    pub payment_intent_id: Option<String>,
}

impl PaymentCallback {
    fn intent_id(self) -> Result<PaymentIntentId, AppError> {
        self.payment_intent_id
            .filter(|id| !id.trim().is_empty())
            .map(PaymentIntentId::new)
            .ok_or_else(|| AppError::bad_request("Missing required fields"))
    }
}

/// Record a successful payment.
///
/// Idempotent: confirming twice returns the same reservation.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Json(callback): Json<PaymentCallback>,
) -> Result<Json<ReservationResponse>, AppError> {
    let intent_id = callback.intent_id()?;
    let reservation = state.engine.confirm_payment(&intent_id)?;
    Ok(Json(reservation.into()))
}

/// Record a failed payment.
///
/// The reservation stays active until it is cancelled or its window ends.
pub async fn payment_failed(
    State(state): State<AppState>,
    Json(callback): Json<PaymentCallback>,
) -> Result<Json<ReservationResponse>, AppError> {
    let intent_id = callback.intent_id()?;
    let reservation = state.engine.record_payment_failure(&intent_id)?;
    Ok(Json(reservation.into()))
}
