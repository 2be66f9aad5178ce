//! Prometheus metrics for the engine and its collaborators.
//!
//! The engine records counters through the `metrics` facade wherever it makes
//! a decision; this module installs the Prometheus recorder, describes every
//! series, and renders the text exposition for a `/metrics` endpoint.
//!
//! # Example
//!
//! ```rust,no_run
//! use spotwatch_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//! let body = exporter.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installs the Prometheus recorder and renders scrapes.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

impl MetricsExporter {
    /// Create an exporter; nothing is recorded until [`install`](Self::install).
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Install the global recorder and describe every series.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// Only one recorder may be installed per process. A second install is
    /// logged and ignored, leaving this exporter without a handle.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                register_metrics();
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Whether this exporter owns the installed recorder.
    #[must_use]
    pub const fn is_installed(&self) -> bool {
        self.handle.is_some()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if the recorder is not installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Reconciler
    describe_counter!(
        "spotwatch_readings_total",
        "Sensor readings processed, labelled by outcome (applied, stale)"
    );
    describe_counter!(
        "spotwatch_spot_transitions_total",
        "Readings that flipped a spot's occupancy"
    );

    // Arbiter
    describe_counter!(
        "spotwatch_reservations_created_total",
        "Reservations granted with a payment intent"
    );
    describe_counter!(
        "spotwatch_reservations_rejected_total",
        "Reservation operations rejected, labelled by reason"
    );
    describe_counter!(
        "spotwatch_reservations_rolled_back_total",
        "Reservations rolled back after a payment failure, timeout or abandoned request"
    );
    describe_counter!(
        "spotwatch_reservations_cancelled_total",
        "Reservations cancelled by the requester"
    );
    describe_counter!(
        "spotwatch_payment_confirmed_total",
        "Payment confirmations applied"
    );
    describe_histogram!(
        "spotwatch_payment_gateway_duration_seconds",
        "Time spent waiting for payment intent creation"
    );

    // Sweeper
    describe_counter!(
        "spotwatch_reservations_swept_total",
        "Reservations closed by the expiry sweep, labelled by target status"
    );
    describe_counter!("spotwatch_sweeps_total", "Expiry sweeps run");

    // Notifier
    describe_counter!(
        "spotwatch_notifications_published_total",
        "Notifications handed to the broadcast sink"
    );
    describe_counter!(
        "spotwatch_notifications_suppressed_total",
        "Duplicate notifications dropped by the dedup window"
    );

    // Ingest
    describe_counter!(
        "spotwatch_ingest_messages_total",
        "Transport messages received, labelled by result"
    );

    // Circuit breaker
    describe_gauge!(
        "spotwatch_circuit_breaker_state",
        "Current circuit breaker state (0=closed, 1=half-open, 2=open)"
    );
    describe_counter!(
        "spotwatch_circuit_breaker_failures_total",
        "Failures counted toward opening the circuit"
    );
    describe_counter!(
        "spotwatch_circuit_breaker_rejections_total",
        "Calls rejected while the circuit was open"
    );

    // Retry
    describe_counter!("spotwatch_retry_attempts_total", "Attempts made under a retry policy");
    describe_counter!(
        "spotwatch_retry_exhausted_total",
        "Operations that failed after exhausting retries"
    );
}
