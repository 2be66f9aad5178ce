//! Reservation endpoints.
//!
//! - POST /api/reservations - reserve a spot and open a payment intent
//! - GET /api/reservations/:id - reservation status
//! - POST /api/reservations/:id/cancel - cancel (refunds a paid reservation)
//! - POST /api/sweep - close reservations whose window has ended
//!
//! # State Machine
//!
//! ```text
//! active ──cancel──▶ cancelled
//!   │
//!   └──window ends──▶ completed (paid) / expired (unpaid)
//! ```

use crate::error::AppError;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spotwatch_core::types::{
    PaymentIntentId, PaymentStatus, Reservation, ReservationId, ReservationRequest,
    ReservationStatus, SpotId,
};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to create a reservation
#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    /// Spot to reserve
    pub spot_id: Option<String>,
    /// Requester contact
    pub user_email: Option<String>,
    /// Optional requester phone
    pub user_phone: Option<String>,
    /// ISO-8601 start of the window
    pub start_time: Option<String>,
    /// Length of the window in hours
    pub duration_hours: Option<f64>,
}

impl CreateReservationRequest {
    fn into_request(self) -> Result<ReservationRequest, AppError> {
        match (self.spot_id, self.user_email, self.start_time, self.duration_hours) {
            (Some(spot_id), Some(user_email), Some(start_time), Some(duration_hours)) => {
                Ok(ReservationRequest {
                    spot_id: SpotId::new(spot_id),
                    user_email,
                    user_phone: self.user_phone,
                    start_time,
                    duration_hours,
                })
            }
            _ => Err(AppError::bad_request("Missing required fields")),
        }
    }
}

/// Reservation as exposed over HTTP; amounts in currency units
#[derive(Debug, Serialize)]
pub struct ReservationView {
    /// Reservation ID
    pub id: ReservationId,
    /// Reserved spot
    pub spot_id: SpotId,
    /// Requester contact
    pub user_email: String,
    /// Requester phone
    pub user_phone: Option<String>,
    /// Window start
    pub start_time: DateTime<Utc>,
    /// Window end
    pub end_time: DateTime<Utc>,
    /// Window length
    pub duration_hours: f64,
    /// Price in currency units (e.g. dollars)
    pub total_amount: f64,
    /// Payment state
    pub payment_status: PaymentStatus,
    /// Payment handle
    pub payment_intent_id: Option<PaymentIntentId>,
    /// Lifecycle state
    pub status: ReservationStatus,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Last update
    pub updated_at: DateTime<Utc>,
}

impl From<Reservation> for ReservationView {
    fn from(reservation: Reservation) -> Self {
        Self {
            id: reservation.id,
            spot_id: reservation.spot_id,
            user_email: reservation.user_email,
            user_phone: reservation.user_phone,
            start_time: reservation.start_time,
            end_time: reservation.end_time,
            duration_hours: reservation.duration_hours,
            total_amount: reservation.total_amount.as_decimal(),
            payment_status: reservation.payment_status,
            payment_intent_id: reservation.payment_intent_id,
            status: reservation.status,
            created_at: reservation.created_at,
            updated_at: reservation.updated_at,
        }
    }
}

/// Response after creating a reservation
#[derive(Debug, Serialize)]
pub struct CreateReservationResponse {
    /// The active reservation
    pub reservation: ReservationView,
    /// Secret the client uses to complete payment
    pub client_secret: String,
}

/// Single reservation response
#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    /// The reservation
    pub reservation: ReservationView,
}

impl From<Reservation> for ReservationResponse {
    fn from(reservation: Reservation) -> Self {
        Self {
            reservation: reservation.into(),
        }
    }
}

/// Sweep result
#[derive(Debug, Serialize)]
pub struct SweepResponse {
    /// Unpaid reservations expired
    pub expired: usize,
    /// Paid reservations completed
    pub completed: usize,
    /// Total transitioned
    pub transitioned: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a reservation.
///
/// Holds the spot, opens a payment intent and returns 201 with the
/// reservation and the intent's client secret. A lost race for the spot is
/// 409; a payment provider failure is 502 (504 on timeout) and leaves the spot
/// free.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:5000/api/reservations \
///   -H "Content-Type: application/json" \
///   -d '{
///     "spot_id": "P1",
///     "user_email": "driver@example.com",
///     "start_time": "2025-01-01T10:00:00Z",
///     "duration_hours": 2
///   }'
/// ```
pub async fn create_reservation(
    State(state): State<AppState>,
    Json(request): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<CreateReservationResponse>), AppError> {
    let request = request.into_request()?;
    let grant = state.engine.reserve(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateReservationResponse {
            reservation: grant.reservation.into(),
            client_secret: grant.client_secret,
        }),
    ))
}

/// Fetch a reservation.
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReservationResponse>, AppError> {
    let reservation = state
        .engine
        .reservation(ReservationId::from_uuid(id))
        .ok_or_else(|| AppError::not_found("Reservation", id))?;
    Ok(Json(reservation.into()))
}

/// Cancel an active reservation.
pub async fn cancel_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReservationResponse>, AppError> {
    let reservation = state.engine.cancel(ReservationId::from_uuid(id)).await?;
    Ok(Json(reservation.into()))
}

/// Run an expiry sweep now.
pub async fn run_sweep(State(state): State<AppState>) -> Json<SweepResponse> {
    let report = state.engine.sweep_now();
    Json(SweepResponse {
        expired: report.expired,
        completed: report.completed,
        transitioned: report.transitioned(),
    })
}
