//! Error taxonomy for the engine.
//!
//! Callers branch on [`ErrorKind`] rather than individual variants: a
//! `Conflict` is expected under contention and must never be mistaken for a
//! system fault.

use crate::types::{PaymentIntentId, ReservationId, ReservationStatus, SpotId};
use std::fmt;
use thiserror::Error;

/// Coarse error classification shared by every engine error
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or missing request fields. No state was mutated.
    Validation,
    /// Unknown spot, reservation or payment handle
    NotFound,
    /// The spot or reservation is not in a state that allows the operation
    Conflict,
    /// The payment collaborator failed or timed out
    ExternalFailure,
}

impl ErrorKind {
    /// Stable snake_case label used in metrics and API error codes
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::ExternalFailure => "external_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by the payment collaborator
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The provider refused the request
    #[error("payment declined: {0}")]
    Declined(String),

    /// The provider could not be reached
    #[error("payment provider unavailable: {0}")]
    Unavailable(String),

    /// No answer within the configured deadline
    #[error("payment provider timed out")]
    Timeout,

    /// Calls are being short-circuited after repeated failures
    #[error("payment provider circuit open")]
    CircuitOpen,

    /// Anything else the provider reported
    #[error("payment provider error: {0}")]
    Other(String),
}

impl GatewayError {
    /// Transient failures are worth retrying; declines are not
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

/// Errors returned by the reservation arbiter and the engine facade
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ReservationError {
    /// The referenced spot does not exist
    #[error("spot {0} not found")]
    SpotNotFound(SpotId),

    /// The referenced reservation does not exist
    #[error("reservation {0} not found")]
    ReservationNotFound(ReservationId),

    /// No reservation carries this payment handle
    #[error("no reservation for payment intent {0}")]
    PaymentIntentNotFound(PaymentIntentId),

    /// The spot is occupied or already reserved
    #[error("spot {spot_id} is not available")]
    Unavailable {
        /// Spot that lost the check-and-act race
        spot_id: SpotId,
    },

    /// The request itself is invalid
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The reservation's current state forbids the operation
    #[error("reservation {id} is {status}, cannot {operation}")]
    InvalidTransition {
        /// Reservation in question
        id: ReservationId,
        /// Its current status
        status: ReservationStatus,
        /// What was attempted
        operation: &'static str,
    },

    /// The payment collaborator failed; the reservation was rolled back
    #[error("payment collaborator failed: {0}")]
    Payment(#[from] GatewayError),
}

impl ReservationError {
    /// Maps the variant onto the shared taxonomy
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::SpotNotFound(_)
            | Self::ReservationNotFound(_)
            | Self::PaymentIntentNotFound(_) => ErrorKind::NotFound,
            Self::Unavailable { .. } | Self::InvalidTransition { .. } => ErrorKind::Conflict,
            Self::InvalidRequest(_) => ErrorKind::Validation,
            Self::Payment(_) => ErrorKind::ExternalFailure,
        }
    }

    /// Short label for the rejection-reason metric
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::SpotNotFound(_) => "spot_not_found",
            Self::ReservationNotFound(_) => "reservation_not_found",
            Self::PaymentIntentNotFound(_) => "payment_intent_not_found",
            Self::Unavailable { .. } => "unavailable",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Payment(_) => "payment_failed",
        }
    }
}

/// Result alias for engine operations
pub type Result<T> = std::result::Result<T, ReservationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            ReservationError::SpotNotFound(SpotId::new("P1")).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ReservationError::Unavailable { spot_id: SpotId::new("P1") }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ReservationError::InvalidRequest("duration".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ReservationError::from(GatewayError::Timeout).kind(),
            ErrorKind::ExternalFailure
        );
    }

    #[test]
    fn transient_gateway_errors() {
        assert!(GatewayError::Timeout.is_transient());
        assert!(GatewayError::Unavailable("down".into()).is_transient());
        assert!(!GatewayError::Declined("card".into()).is_transient());
        assert!(!GatewayError::CircuitOpen.is_transient());
    }

    #[test]
    fn messages_name_the_subject() {
        let err = ReservationError::Unavailable { spot_id: SpotId::new("PARK_001") };
        assert_eq!(err.to_string(), "spot PARK_001 is not available");
    }
}
