//! Health check endpoints.

use super::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use spotwatch_runtime::circuit_breaker::State as BreakerState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Server time
    pub timestamp: DateTime<Utc>,
    /// Service version
    pub version: String,
}

/// Liveness check.
///
/// Returns 200 OK if the process is serving requests.
///
/// ```bash
/// curl http://localhost:5000/health
/// # {"status":"healthy","timestamp":"...","version":"0.1.0"}
/// ```
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    /// Overall readiness status
    pub ready: bool,
    /// Spots known to the engine
    pub spots: usize,
    /// Payment circuit state, when a breaker is configured
    pub payment_circuit: Option<&'static str>,
    /// Connected WebSocket clients
    pub subscribers: usize,
}

/// Readiness check.
///
/// Not ready (503) while the payment circuit is open: reservations would be
/// rejected without reaching the provider.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let circuit = state.payment_breaker.as_ref().map(|breaker| breaker.state());
    let ready = circuit != Some(BreakerState::Open);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            spots: state.engine.registry().len(),
            payment_circuit: circuit.map(BreakerState::as_str),
            subscribers: state.notifications.receiver_count(),
        }),
    )
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Some(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics disabled").into_response(),
    }
}
