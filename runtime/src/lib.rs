//! # Spotwatch Runtime
//!
//! Imperative-shell pieces shared by every host of the engine.
//!
//! ## Core Components
//!
//! - **Retry**: exponential backoff for transient collaborator failures
//! - **Circuit Breaker**: fail fast while the payment provider is down
//! - **Resilient Gateway**: timeout + breaker + refund retries around any payment gateway
//! - **Sweep Scheduler**: periodic expiry sweeps with graceful shutdown
//! - **Metrics**: Prometheus recorder and series descriptions
//!
//! ## Example
//!
//! ```ignore
//! use spotwatch_runtime::payment::ResilientGateway;
//! use spotwatch_runtime::scheduler::SweepScheduler;
//!
//! let gateway = ResilientGateway::new(provider, breaker_config, Duration::from_secs(10));
//! let engine = Arc::new(ParkingEngine::new(config, env_with(gateway)));
//! let scheduler = SweepScheduler::new(Arc::clone(&engine), Duration::from_secs(60)).spawn();
//! // ...
//! scheduler.shutdown().await;
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Circuit breaker pattern for preventing cascading failures
pub mod circuit_breaker;

/// Prometheus metrics for observability
pub mod metrics;

/// Resilience decorator for the payment collaborator
pub mod payment;

/// Periodic expiry sweeps
pub mod scheduler;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
pub use metrics::{MetricsError, MetricsExporter};
pub use payment::ResilientGateway;
pub use retry::RetryPolicy;
pub use scheduler::{SchedulerHandle, SweepScheduler};
