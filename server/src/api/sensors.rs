//! Sensor ingestion endpoints.
//!
//! - POST /api/sensor-data - one status reading, direct from a sensor or bridge
//! - POST /api/sensor-messages - a raw transport message routed by topic
//! - GET /api/ingest/stats - router counters

use crate::error::AppError;
use crate::ingest::{IngestOutcome, IngestStats, SensorPayload};
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use spotwatch_core::types::SpotId;

/// Result of applying one reading
#[derive(Debug, Serialize)]
pub struct SensorDataResponse {
    /// Always `success`
    pub status: &'static str,
    /// Spot the reading was applied to
    pub spot_id: SpotId,
    /// Spot occupancy after the reading
    pub occupied: bool,
    /// Whether the reading flipped occupancy
    pub status_changed: bool,
    /// Whether the reading was older than the spot's state and only archived
    pub stale: bool,
}

/// Receive a sensor reading.
///
/// Bodies that are not valid JSON for a reading, including wrongly typed
/// fields, are counted as ingest errors and answered with `400`.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:5000/api/sensor-data \
///   -H "Content-Type: application/json" \
///   -d '{"sensor_id":"P1","occupied":true,"timestamp":"2025-01-01T10:00:00Z","battery_level":87}'
/// ```
pub async fn receive_sensor_data(
    State(state): State<AppState>,
    payload: Result<Json<SensorPayload>, JsonRejection>,
) -> Result<Json<SensorDataResponse>, AppError> {
    let Json(payload) = payload.map_err(|rejection| {
        state.ingest.record_direct(false);
        AppError::bad_request(rejection.body_text())
    })?;
    let reading = payload.into_reading().map_err(|err| {
        state.ingest.record_direct(false);
        AppError::bad_request(err.to_string())
    })?;
    let outcome = state.engine.ingest(reading);
    state.ingest.record_direct(true);

    Ok(Json(SensorDataResponse {
        status: "success",
        spot_id: outcome.spot.id.clone(),
        occupied: outcome.spot.occupied,
        status_changed: outcome.changed,
        stale: outcome.is_stale(),
    }))
}

/// A message as delivered by the transport
#[derive(Debug, Deserialize)]
pub struct TransportMessage {
    /// MQTT topic, e.g. `parking/sensor/P1/status`
    pub topic: String,
    /// JSON payload, either inline or as an encoded string
    pub payload: serde_json::Value,
}

/// Acknowledgement for a routed message
#[derive(Debug, Serialize)]
pub struct MessageAck {
    /// Topic the message arrived on
    pub topic: String,
    /// `reconciled`, `heartbeat` or `sensor_fault`
    pub handled_as: &'static str,
    /// Set for status messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_changed: Option<bool>,
}

/// Route a raw transport message by topic.
pub async fn receive_sensor_message(
    State(state): State<AppState>,
    Json(message): Json<TransportMessage>,
) -> Result<Json<MessageAck>, AppError> {
    let payload = match message.payload {
        serde_json::Value::String(raw) => raw,
        other => other.to_string(),
    };
    let outcome = state
        .ingest
        .route(&message.topic, &payload)
        .map_err(|err| AppError::bad_request(err.to_string()))?;

    let (handled_as, status_changed) = match outcome {
        IngestOutcome::Reconciled(outcome) => ("reconciled", Some(outcome.changed)),
        IngestOutcome::Heartbeat { .. } => ("heartbeat", None),
        IngestOutcome::SensorFault { .. } => ("sensor_fault", None),
    };
    Ok(Json(MessageAck {
        topic: message.topic,
        handled_as,
        status_changed,
    }))
}

/// Ingestion counters.
pub async fn ingest_stats(State(state): State<AppState>) -> (StatusCode, Json<IngestStats>) {
    (StatusCode::OK, Json(state.ingest.stats()))
}
