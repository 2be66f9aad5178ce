//! Circuit breaker for the payment collaborator.
//!
//! When the provider keeps failing, the breaker "opens" and reservation
//! requests fail fast with `CircuitOpen` instead of each one waiting out the
//! payment timeout while holding a spot.
//!
//! # States
//!
//! - **Closed**: Normal operation. Calls pass through. Consecutive failures are counted.
//! - **Open**: Too many failures. Calls are rejected until the cool-down elapses.
//! - **HalfOpen**: Trial calls are let through; enough successes close the circuit.
//!
//! # Example
//!
//! ```rust
//! use spotwatch_core::environment::{PaymentGateway, PaymentIntentRequest};
//! use spotwatch_core::error::GatewayError;
//! use spotwatch_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
//! use std::time::Duration;
//!
//! # async fn example(gateway: &dyn PaymentGateway, request: PaymentIntentRequest) {
//! let breaker = CircuitBreaker::new(
//!     "payments",
//!     CircuitBreakerConfig::builder()
//!         .failure_threshold(5)
//!         .timeout(Duration::from_secs(30))
//!         .build(),
//! );
//!
//! // Declines are the customer's problem, not the provider's
//! let outcome = breaker
//!     .call_with_predicate(|| gateway.create_intent(request), GatewayError::is_transient)
//!     .await;
//! if let Err(CircuitBreakerError::Open) = outcome {
//!     // fail the reservation fast and release the spot
//! }
//! # }
//! ```

use metrics::{counter, gauge};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: usize,
    /// Duration to wait before transitioning from Open to `HalfOpen`
    pub timeout: Duration,
    /// Number of successes in `HalfOpen` state before closing the circuit
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: usize,
    timeout: Duration,
    success_threshold: usize,
}

impl CircuitBreakerConfigBuilder {
    /// Circuit opens after this many consecutive failures (minimum 1).
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// How long to stay Open before probing.
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    /// Successful trial calls needed to close the circuit again (minimum 1).
    #[must_use]
    pub const fn success_threshold(mut self, threshold: usize) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.max(1),
            timeout: self.timeout,
            success_threshold: self.success_threshold.max(1),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Calls pass through normally
    Closed,
    /// Calls fail immediately
    Open,
    /// Probing whether the collaborator recovered
    HalfOpen,
}

impl State {
    /// Lowercase label for health reports
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::HalfOpen => "half_open",
            Self::Open => "open",
        }
    }

    const fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

/// Errors from circuit breaker operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, call rejected
    #[error("circuit breaker is open")]
    Open,
    /// Operation failed
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct Inner {
    state: State,
    failure_count: usize,
    success_count: usize,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding one collaborator.
///
/// Cloning shares state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    config: Arc<CircuitBreakerConfig>,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    /// Create a breaker; `name` labels its metrics.
    #[must_use]
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        gauge!("spotwatch_circuit_breaker_state", "breaker" => name).set(State::Closed.gauge_value());
        Self {
            name,
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(Inner {
                state: State::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut Inner, to: State) {
        tracing::info!(breaker = self.name, from = ?inner.state, to = ?to, "Circuit breaker transition");
        inner.state = to;
        gauge!("spotwatch_circuit_breaker_state", "breaker" => self.name).set(to.gauge_value());
    }

    /// Current state. An Open circuit whose cool-down elapsed reports `HalfOpen`.
    #[must_use]
    pub fn state(&self) -> State {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    fn refresh(&self, inner: &mut Inner) {
        if inner.state == State::Open
            && inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.config.timeout)
        {
            inner.success_count = 0;
            self.transition(inner, State::HalfOpen);
        }
    }

    /// Call an operation; only errors approved by `trips` count as failures.
    ///
    /// Business rejections (a declined card) should not open the circuit.
    ///
    /// # Errors
    ///
    /// Returns `CircuitBreakerError::Open` if the circuit is open.
    /// Returns `CircuitBreakerError::Inner` if the operation fails.
    pub async fn call_with_predicate<F, Fut, T, E, P>(
        &self,
        operation: F,
        trips: P,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        if self.state() == State::Open {
            counter!("spotwatch_circuit_breaker_rejections_total", "breaker" => self.name).increment(1);
            tracing::warn!(breaker = self.name, "Circuit breaker is open, rejecting call");
            return Err(CircuitBreakerError::Open);
        }

        match operation().await {
            Ok(result) => {
                self.on_success();
                Ok(result)
            }
            Err(err) => {
                if trips(&err) {
                    self.on_failure();
                } else {
                    self.on_success();
                }
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            State::Closed | State::Open => inner.failure_count = 0,
            State::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                    self.transition(&mut inner, State::Closed);
                }
            }
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        counter!("spotwatch_circuit_breaker_failures_total", "breaker" => self.name).increment(1);
        match inner.state {
            State::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.opened_at = Some(Instant::now());
                    self.transition(&mut inner, State::Open);
                }
            }
            State::HalfOpen => {
                inner.success_count = 0;
                inner.opened_at = Some(Instant::now());
                self.transition(&mut inner, State::Open);
            }
            State::Open => inner.opened_at = Some(Instant::now()),
        }
    }
}
