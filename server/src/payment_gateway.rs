//! Mock payment gateway for development.
//!
//! Issues intents the way a card processor would (an id plus a client
//! secret) and accepts refunds for intents it issued. Replace with a real
//! provider integration in production.

use spotwatch_core::environment::{
    GatewayFuture, PaymentGateway, PaymentIntent, PaymentIntentRequest,
};
use spotwatch_core::error::GatewayError;
use spotwatch_core::types::{Money, PaymentIntentId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// In-process stand-in for a payment provider
#[derive(Clone, Debug, Default)]
pub struct MockPaymentGateway {
    latency: Duration,
    issued: Arc<Mutex<HashMap<PaymentIntentId, Money>>>,
}

impl MockPaymentGateway {
    /// Creates a gateway that answers immediately
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates network latency on every call
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<dyn PaymentGateway> {
        Arc::new(Self::new())
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create_intent(&self, request: PaymentIntentRequest) -> GatewayFuture<PaymentIntent> {
        let latency = self.latency;
        let issued = Arc::clone(&self.issued);
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if request.amount == Money::default() {
                return Err(GatewayError::Declined("amount must be positive".into()));
            }

            let id = PaymentIntentId::new(format!("pi_mock_{}", Uuid::new_v4().simple()));
            let client_secret = format!("{id}_secret_{}", Uuid::new_v4().simple());
            issued
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id.clone(), request.amount);

            tracing::info!(
                payment_intent_id = %id,
                amount = request.amount.cents(),
                currency = %request.currency,
                "Mock payment intent created"
            );
            Ok(PaymentIntent { id, client_secret })
        })
    }

    fn refund(&self, intent_id: PaymentIntentId, amount: Money) -> GatewayFuture<()> {
        let latency = self.latency;
        let issued = Arc::clone(&self.issued);
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let charged = issued
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&intent_id)
                .copied();
            match charged {
                Some(charged) if amount <= charged => {
                    tracing::info!(
                        payment_intent_id = %intent_id,
                        amount = amount.cents(),
                        "Mock refund processed"
                    );
                    Ok(())
                }
                Some(_) => Err(GatewayError::Declined(format!(
                    "refund exceeds charge for {intent_id}"
                ))),
                None => Err(GatewayError::Declined(format!("unknown payment intent {intent_id}"))),
            }
        })
    }
}
