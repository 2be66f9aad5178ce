//! Application state for the spotwatch HTTP server.

use crate::ingest::IngestRouter;
use spotwatch_core::engine::ParkingEngine;
use spotwatch_core::notifier::BroadcastSink;
use spotwatch_runtime::circuit_breaker::CircuitBreaker;
use spotwatch_runtime::metrics::MetricsExporter;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned (cheaply via Arc) for each request.
#[derive(Clone)]
pub struct AppState {
    /// The parking engine
    pub engine: Arc<ParkingEngine>,

    /// Fan-out of engine notifications, subscribed to by WebSocket clients
    pub notifications: BroadcastSink,

    /// Topic router for sensor transport messages
    pub ingest: Arc<IngestRouter>,

    /// Prometheus exporter (uninstalled when metrics are disabled)
    pub metrics: Arc<MetricsExporter>,

    /// Breaker guarding the payment provider, reported by `/ready`
    pub payment_breaker: Option<CircuitBreaker>,

    /// Readings returned with a single spot
    pub recent_readings_limit: usize,
}

impl AppState {
    /// Create a new application state.
    ///
    /// `notifications` must be the sink the engine publishes to.
    #[must_use]
    pub fn new(engine: Arc<ParkingEngine>, notifications: BroadcastSink) -> Self {
        let ingest = Arc::new(IngestRouter::new(Arc::clone(&engine)));
        Self {
            engine,
            notifications,
            ingest,
            metrics: Arc::new(MetricsExporter::new()),
            payment_breaker: None,
            recent_readings_limit: 10,
        }
    }

    /// Attach an installed metrics exporter
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsExporter>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Report this breaker's state on `/ready`
    #[must_use]
    pub fn with_payment_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.payment_breaker = Some(breaker);
        self
    }

    /// Override how many readings `GET /api/spots/:id` returns
    #[must_use]
    pub const fn with_recent_readings_limit(mut self, limit: usize) -> Self {
        self.recent_readings_limit = limit;
        self
    }
}
