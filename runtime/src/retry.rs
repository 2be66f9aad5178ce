//! Retry with exponential backoff for transient collaborator failures.
//!
//! Used for payment refunds, where a dropped request is worth repeating but a
//! decline is not.
//!
//! # Example
//!
//! ```rust
//! use spotwatch_core::environment::PaymentGateway;
//! use spotwatch_core::types::{Money, PaymentIntentId};
//! use spotwatch_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example(gateway: &dyn PaymentGateway) -> Result<(), spotwatch_core::error::GatewayError> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(4)
//!     .initial_delay(Duration::from_millis(200))
//!     .max_delay(Duration::from_secs(2))
//!     .jitter(0.2)
//!     .build();
//!
//! let intent = PaymentIntentId::new("pi_123");
//! retry_with_predicate(
//!     &policy,
//!     || gateway.refund(intent.clone(), Money::from_cents(400)),
//!     |err| err.is_transient(),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

use metrics::counter;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

/// Backoff schedule for a retried call.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 5 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: 0.0 (no randomization)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Wait before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single wait
    pub max_delay: Duration,
    /// Growth factor between consecutive waits
    pub multiplier: f64,
    /// Fraction of each delay that is randomized, in `0.0..=1.0`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Starts from the defaults
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    /// Base delay for a given attempt number, before jitter.
    ///
    /// `initial_delay * multiplier ^ attempt`, capped at `max_delay`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.min(i32::MAX as usize) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let spread = self.jitter.min(1.0);
        let factor = rand::thread_rng().gen_range((1.0 - spread)..=1.0);
        delay.mul_f64(factor)
    }
}

/// Builds a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: usize,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
}

impl RetryPolicyBuilder {
    /// Retries after the first attempt
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Wait before the first retry
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Cap on any single wait
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Growth factor between waits
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Randomize up to this fraction of each delay.
    #[must_use]
    pub const fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Finishes the policy
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

/// Retry an async operation while `is_retryable` approves the error.
///
/// # Errors
///
/// Returns the first non-retryable error immediately, or the last error once
/// retries are exhausted.
///
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        counter!("spotwatch_retry_attempts_total").increment(1);
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Call succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if !is_retryable(&err) => {
                tracing::debug!(error = %err, "Permanent failure, not retrying");
                return Err(err);
            }
            Err(err) if attempt >= policy.max_retries => {
                counter!("spotwatch_retry_exhausted_total").increment(1);
                tracing::error!(attempt, error = %err, "Retries exhausted");
                return Err(err);
            }
            Err(err) => {
                let delay = policy.jittered(policy.delay_for_attempt(attempt));
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Transient failure, backing off"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spotwatch_core::error::GatewayError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_retries: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(5))
            .build()
    }

    #[test]
    fn delays_grow_then_cap() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(250))
            .multiplier(3.0)
            .max_delay(Duration::from_secs(2))
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(750));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(400), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::builder().jitter(0.5).build();
        for _ in 0..50 {
            let delay = policy.jittered(Duration::from_millis(100));
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(100));
        }
    }

    #[test]
    fn first_success_is_returned_without_retry() {
        let counter = AtomicUsize::new(0);
        let result = tokio_test::block_on(retry_with_predicate(
            &RetryPolicy::default(),
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>(42) }
            },
            |_| true,
        ));
        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_refund_failures_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));

        let result = retry_with_predicate(
            &fast(3),
            || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(GatewayError::Unavailable("connection reset".into()))
                    } else {
                        Ok("re_1")
                    }
                }
            },
            GatewayError::is_transient,
        )
        .await;

        assert_eq!(result, Ok("re_1"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let counter = Arc::new(AtomicUsize::new(0));

        let result = retry_with_predicate(
            &fast(2),
            || {
                let c = Arc::clone(&counter);
                async move {
                    let attempt = c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(format!("failure {attempt}"))
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 3, "first attempt plus two retries");
    }

    #[tokio::test]
    async fn declines_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));

        let result = retry_with_predicate(
            &fast(3),
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(GatewayError::Declined("charge already refunded".into()))
                }
            },
            GatewayError::is_transient,
        )
        .await;

        assert!(matches!(result, Err(GatewayError::Declined(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
