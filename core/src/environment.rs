//! Collaborators injected into the engine.
//!
//! The engine never reads wall-clock time, talks to a payment provider or
//! pushes to subscribers directly. Hosts plug implementations of these traits
//! into [`EngineEnvironment`](crate::engine::EngineEnvironment); tests use the
//! doubles from `spotwatch-testing`.

use crate::error::GatewayError;
use crate::notifier::Notification;
use crate::types::{Money, PaymentIntentId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Clock trait for time abstraction
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Payment gateway result
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Boxed future returned by [`PaymentGateway`] methods
pub type GatewayFuture<T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send>>;

/// Request to open a payment intent for a reservation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentIntentRequest {
    /// Amount to charge
    pub amount: Money,
    /// ISO currency code (lowercase, e.g. `usd`)
    pub currency: String,
    /// Correlation data (`reservation_id`, `spot_id`)
    pub metadata: BTreeMap<String, String>,
}

/// Payment intent issued by the provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentIntent {
    /// Provider handle, later echoed by the confirmation callback
    pub id: PaymentIntentId,
    /// Secret handed to the client to complete the payment
    pub client_secret: String,
}

/// Payment gateway trait
///
/// Abstraction over the external payment provider. Implementations must be
/// cheap to call concurrently; the engine bounds every call with a timeout.
pub trait PaymentGateway: Send + Sync {
    /// Open a payment intent
    ///
    /// # Errors
    ///
    /// Returns error if the provider rejects the request or is unreachable
    fn create_intent(&self, request: PaymentIntentRequest) -> GatewayFuture<PaymentIntent>;

    /// Refund a previously confirmed intent
    ///
    /// # Errors
    ///
    /// Returns error if the refund cannot be issued
    fn refund(&self, intent_id: PaymentIntentId, amount: Money) -> GatewayFuture<()>;
}

/// Fire-and-forget destination for notifications.
///
/// Delivery is at-most-once; a sink with no listeners simply drops events.
pub trait NotificationSink: Send + Sync {
    /// Hand a notification to the broadcast collaborator
    fn publish(&self, notification: Notification);
}

/// Sink that discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn publish(&self, _notification: Notification) {}
}
