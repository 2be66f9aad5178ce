//! Router configuration.

use super::health::{health_check, metrics, readiness_check};
use super::state::AppState;
use crate::api::{analytics, payments, reservations, sensors, spots, websocket};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - Health, readiness and Prometheus endpoints at the root
/// - JSON API and the WebSocket stream under `/api`
/// - Every request traced through `tower-http`
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Sensor ingestion
        .route("/sensor-data", post(sensors::receive_sensor_data))
        .route("/sensor-messages", post(sensors::receive_sensor_message))
        .route("/ingest/stats", get(sensors::ingest_stats))
        // Spots
        .route("/spots", get(spots::list_spots).post(spots::provision_spot))
        .route("/spots/available", get(spots::available_spots))
        .route("/spots/:id", get(spots::get_spot))
        // Reservations
        .route("/reservations", post(reservations::create_reservation))
        .route("/reservations/:id", get(reservations::get_reservation))
        .route(
            "/reservations/:id/cancel",
            post(reservations::cancel_reservation),
        )
        .route("/sweep", post(reservations::run_sweep))
        // Payment callbacks
        .route("/payments/confirm", post(payments::confirm_payment))
        .route("/payments/failed", post(payments::payment_failed))
        // Analytics
        .route("/analytics/occupancy", get(analytics::occupancy))
        // Real-time updates
        .route("/ws", get(websocket::notifications));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
