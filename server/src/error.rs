//! Error types for HTTP handlers.
//!
//! Bridges engine errors and HTTP responses through Axum's `IntoResponse`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use spotwatch_core::error::{ErrorKind, GatewayError, ReservationError};
use std::fmt;

/// Application error type for HTTP handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<Spot>, AppError> {
///     let spot = state.engine.spot(&id).ok_or_else(|| AppError::not_found("Spot", &id))?;
///     Ok(Json(spot))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: String,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
        }
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message.into(),
            "BAD_REQUEST".to_string(),
        )
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND".to_string(),
        )
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE".to_string(),
        )
    }

    /// HTTP status this error renders as
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        let (status, code) = match (&err, err.kind()) {
            (ReservationError::Payment(GatewayError::Timeout), _) => {
                (StatusCode::GATEWAY_TIMEOUT, "PAYMENT_TIMEOUT")
            }
            (_, ErrorKind::Validation) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (_, ErrorKind::NotFound) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            (_, ErrorKind::Conflict) => (StatusCode::CONFLICT, "CONFLICT"),
            (_, ErrorKind::ExternalFailure) => (StatusCode::BAD_GATEWAY, "PAYMENT_FAILED"),
        };
        Self::new(status, err.to_string(), code.to_string())
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = %self.code,
                message = %self.message,
                "Request failed"
            );
        } else {
            tracing::debug!(
                status = %self.status,
                code = %self.code,
                message = %self.message,
                "Request rejected"
            );
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
