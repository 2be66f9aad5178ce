//! Resilience decorator for the payment collaborator.
//!
//! Wraps any [`PaymentGateway`] with a per-call timeout, a circuit breaker and
//! (for refunds only) retries on transient errors. Intent creation is never
//! retried here: the engine holds a reserved spot while it waits, so a slow
//! provider should fail fast and release it.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use crate::retry::{RetryPolicy, retry_with_predicate};
use spotwatch_core::environment::{
    GatewayFuture, GatewayResult, PaymentGateway, PaymentIntent, PaymentIntentRequest,
};
use spotwatch_core::error::GatewayError;
use spotwatch_core::types::{Money, PaymentIntentId};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Payment gateway with timeout, circuit breaker and refund retries
pub struct ResilientGateway {
    inner: Arc<dyn PaymentGateway>,
    breaker: CircuitBreaker,
    call_timeout: Duration,
    refund_retry: RetryPolicy,
}

impl ResilientGateway {
    /// Wraps `inner` with the given breaker settings
    #[must_use]
    pub fn new(
        inner: Arc<dyn PaymentGateway>,
        breaker: CircuitBreakerConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new("payment_gateway", breaker),
            call_timeout,
            refund_retry: RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(200))
                .max_delay(Duration::from_secs(2))
                .jitter(0.2)
                .build(),
        }
    }

    /// Overrides the refund retry policy
    #[must_use]
    pub fn with_refund_retry(mut self, policy: RetryPolicy) -> Self {
        self.refund_retry = policy;
        self
    }

    /// The breaker guarding the provider
    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

/// Runs `call` through the breaker; the call is not started when the circuit is open
async fn guarded<T, F, Fut>(breaker: &CircuitBreaker, timeout: Duration, call: F) -> GatewayResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let outcome = breaker
        .call_with_predicate(
            || async move {
                tokio::time::timeout(timeout, call())
                    .await
                    .unwrap_or(Err(GatewayError::Timeout))
            },
            GatewayError::is_transient,
        )
        .await;
    match outcome {
        Ok(value) => Ok(value),
        Err(CircuitBreakerError::Open) => Err(GatewayError::CircuitOpen),
        Err(CircuitBreakerError::Inner(err)) => Err(err),
    }
}

impl PaymentGateway for ResilientGateway {
    fn create_intent(&self, request: PaymentIntentRequest) -> GatewayFuture<PaymentIntent> {
        let inner = Arc::clone(&self.inner);
        let breaker = self.breaker.clone();
        let timeout = self.call_timeout;
        Box::pin(async move { guarded(&breaker, timeout, || inner.create_intent(request)).await })
    }

    fn refund(&self, intent_id: PaymentIntentId, amount: Money) -> GatewayFuture<()> {
        let inner = Arc::clone(&self.inner);
        let breaker = self.breaker.clone();
        let timeout = self.call_timeout;
        let policy = self.refund_retry.clone();
        Box::pin(async move {
            retry_with_predicate(
                &policy,
                || {
                    let inner = Arc::clone(&inner);
                    let intent_id = intent_id.clone();
                    guarded(&breaker, timeout, move || inner.refund(intent_id, amount))
                },
                GatewayError::is_transient,
            )
            .await
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls with `error`, then succeeds
    struct Flaky {
        failures: usize,
        error: GatewayError,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize, error: GatewayError) -> Arc<Self> {
            Arc::new(Self {
                failures,
                error,
                calls: AtomicUsize::new(0),
            })
        }

        fn outcome(&self) -> GatewayResult<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    impl PaymentGateway for Flaky {
        fn create_intent(&self, _request: PaymentIntentRequest) -> GatewayFuture<PaymentIntent> {
            let result = self.outcome().map(|()| PaymentIntent {
                id: PaymentIntentId::new("pi_1"),
                client_secret: "secret".into(),
            });
            Box::pin(async move { result })
        }

        fn refund(&self, _intent_id: PaymentIntentId, _amount: Money) -> GatewayFuture<()> {
            let result = self.outcome();
            Box::pin(async move { result })
        }
    }

    fn request() -> PaymentIntentRequest {
        PaymentIntentRequest {
            amount: Money::from_cents(200),
            currency: "usd".into(),
            metadata: std::collections::BTreeMap::new(),
        }
    }

    fn gateway(inner: Arc<dyn PaymentGateway>, failures: usize) -> ResilientGateway {
        ResilientGateway::new(
            inner,
            CircuitBreakerConfig::builder()
                .failure_threshold(failures)
                .timeout(Duration::from_secs(60))
                .build(),
            Duration::from_secs(1),
        )
        .with_refund_retry(
            RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(1))
                .build(),
        )
    }

    #[tokio::test]
    async fn transient_failures_open_the_circuit() {
        let inner = Flaky::new(10, GatewayError::Unavailable("down".into()));
        let gateway = gateway(Arc::clone(&inner) as _, 2);
        for _ in 0..2 {
            assert!(gateway.create_intent(request()).await.is_err());
        }
        let err = gateway.create_intent(request()).await.unwrap_err();
        assert_eq!(err, GatewayError::CircuitOpen);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn declines_do_not_open_the_circuit() {
        let inner = Flaky::new(5, GatewayError::Declined("card".into()));
        let gateway = gateway(inner, 1);
        for _ in 0..5 {
            let err = gateway.create_intent(request()).await.unwrap_err();
            assert!(matches!(err, GatewayError::Declined(_)));
        }
        assert!(gateway.create_intent(request()).await.is_ok());
    }

    #[tokio::test]
    async fn refunds_retry_transient_errors() {
        let inner = Flaky::new(2, GatewayError::Unavailable("blip".into()));
        let gateway = gateway(Arc::clone(&inner) as _, 10);
        gateway
            .refund(PaymentIntentId::new("pi_1"), Money::from_cents(200))
            .await
            .unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        struct Slow;
        impl PaymentGateway for Slow {
            fn create_intent(&self, _request: PaymentIntentRequest) -> GatewayFuture<PaymentIntent> {
                Box::pin(futures::future::pending::<GatewayResult<PaymentIntent>>())
            }
            fn refund(&self, _intent_id: PaymentIntentId, _amount: Money) -> GatewayFuture<()> {
                Box::pin(futures::future::pending::<GatewayResult<()>>())
            }
        }
        let gateway = ResilientGateway::new(
            Arc::new(Slow),
            CircuitBreakerConfig::default(),
            Duration::from_millis(20),
        );
        let err = gateway.create_intent(request()).await.unwrap_err();
        assert_eq!(err, GatewayError::Timeout);
    }
}
