//! Sensor message ingestion.
//!
//! Sensors publish on MQTT-style topics:
//!
//! ```text
//! parking/sensor/<sensor_id>/status     occupancy readings
//! parking/sensor/<sensor_id>/heartbeat  liveness pings
//! parking/sensor/<sensor_id>/error      sensor-reported faults
//! ```
//!
//! The broker connection itself lives outside this process; whatever bridges
//! the broker forwards each message to [`IngestRouter::route`] (over HTTP via
//! `POST /api/sensor-messages`). Status payloads share their schema with
//! `POST /api/sensor-data`.

use metrics::counter;
use serde::{Deserialize, Serialize};
use spotwatch_core::engine::ParkingEngine;
use spotwatch_core::reconciler::ReconcileOutcome;
use spotwatch_core::types::{SensorReading, SpotDefaults, SpotId, Telemetry, parse_instant};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use thiserror::Error;

const TOPIC_PREFIX: &str = "parking/sensor/";

/// Why a message could not be ingested
#[derive(Debug, Error)]
pub enum IngestError {
    /// Topic does not follow `parking/sensor/<id>/<kind>`
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// Payload is not valid JSON for its topic
    #[error("invalid payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Payload is JSON but lacks required fields
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Problems with a sensor status payload
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    /// `sensor_id`, `occupied` or `timestamp` absent
    #[error("Missing required fields")]
    MissingFields,

    /// `timestamp` is not ISO-8601
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Status payload as published by a sensor
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SensorPayload {
    /// Reporting sensor
    pub sensor_id: Option<String>,
    /// Vehicle detected
    pub occupied: Option<bool>,
    /// ISO-8601 measurement time
    pub timestamp: Option<String>,
    /// Placement hints for a spot seen for the first time
    pub location: Option<String>,
    /// Level hint
    pub level: Option<String>,
    /// Zone hint
    pub zone: Option<String>,
    /// Measured distance
    pub distance_cm: Option<f64>,
    /// Battery percentage
    pub battery_level: Option<i64>,
    /// Signal strength
    pub signal_strength: Option<i64>,
}

impl SensorPayload {
    /// Validates the payload into a reading
    ///
    /// # Errors
    ///
    /// [`PayloadError::MissingFields`] when a required field is absent,
    /// [`PayloadError::InvalidTimestamp`] when the timestamp does not parse.
    pub fn into_reading(self) -> Result<SensorReading, PayloadError> {
        let (Some(sensor_id), Some(occupied), Some(raw_timestamp)) =
            (self.sensor_id, self.occupied, self.timestamp)
        else {
            return Err(PayloadError::MissingFields);
        };
        if sensor_id.trim().is_empty() {
            return Err(PayloadError::MissingFields);
        }
        let timestamp =
            parse_instant(&raw_timestamp).ok_or(PayloadError::InvalidTimestamp(raw_timestamp))?;

        Ok(SensorReading::new(SpotId::new(sensor_id), occupied, timestamp)
            .with_telemetry(Telemetry {
                distance_cm: self.distance_cm,
                battery_level: self.battery_level,
                signal_strength: self.signal_strength,
            })
            .with_placement(SpotDefaults {
                location: self.location,
                level: self.level,
                zone: self.zone,
            }))
    }
}

#[derive(Debug, Deserialize)]
struct HeartbeatPayload {
    sensor_id: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FaultPayload {
    sensor_id: Option<String>,
    error: Option<String>,
    timestamp: Option<String>,
}

/// Parsed message topic
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SensorTopic {
    /// Occupancy reading
    Status(SpotId),
    /// Liveness ping
    Heartbeat(SpotId),
    /// Sensor-reported fault
    Error(SpotId),
}

impl SensorTopic {
    /// Parses `parking/sensor/<id>/<kind>`
    #[must_use]
    pub fn parse(topic: &str) -> Option<Self> {
        let rest = topic.strip_prefix(TOPIC_PREFIX)?;
        let (id, kind) = rest.split_once('/')?;
        if id.is_empty() || id.contains('/') {
            return None;
        }
        let id = SpotId::new(id);
        match kind {
            "status" => Some(Self::Status(id)),
            "heartbeat" => Some(Self::Heartbeat(id)),
            "error" => Some(Self::Error(id)),
            _ => None,
        }
    }
}

/// What routing a message did
#[derive(Clone, Debug, PartialEq)]
pub enum IngestOutcome {
    /// A status reading reached the engine
    Reconciled(ReconcileOutcome),
    /// A heartbeat was logged
    Heartbeat {
        /// Reporting sensor
        sensor_id: SpotId,
        /// Self-reported status, if any
        status: Option<String>,
    },
    /// A sensor fault was logged
    SensorFault {
        /// Reporting sensor
        sensor_id: SpotId,
        /// Reported error
        error: Option<String>,
    },
}

/// Router counters
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IngestStats {
    /// Seconds since the router started
    pub uptime_seconds: f64,
    /// Messages handed to the router
    pub messages_received: u64,
    /// Status readings that reached the engine
    pub messages_processed: u64,
    /// Messages rejected
    pub errors_count: u64,
    /// `processed / received * 100`
    pub success_rate: f64,
}

/// Routes transport messages to the engine by topic
pub struct IngestRouter {
    engine: Arc<ParkingEngine>,
    started_at: Instant,
    received: AtomicU64,
    processed: AtomicU64,
    errors: AtomicU64,
}

impl IngestRouter {
    /// Creates a router feeding `engine`
    #[must_use]
    pub fn new(engine: Arc<ParkingEngine>) -> Self {
        Self {
            engine,
            started_at: Instant::now(),
            received: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Routes one message.
    ///
    /// A status payload without `sensor_id` takes the id from the topic.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] for unknown topics, malformed JSON and status
    /// payloads missing required fields. Every error is counted.
    pub fn route(&self, topic: &str, payload: &str) -> Result<IngestOutcome, IngestError> {
        self.received.fetch_add(1, Ordering::Relaxed);
        let result = self.dispatch(topic, payload);
        match &result {
            Ok(IngestOutcome::Reconciled(_)) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                counter!("spotwatch_ingest_messages_total", "result" => "processed").increment(1);
            }
            Ok(_) => {
                counter!("spotwatch_ingest_messages_total", "result" => "logged").increment(1);
            }
            Err(err) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                counter!("spotwatch_ingest_messages_total", "result" => "error").increment(1);
                tracing::warn!(topic, error = %err, "Rejected sensor message");
            }
        }
        result
    }

    fn dispatch(&self, topic: &str, payload: &str) -> Result<IngestOutcome, IngestError> {
        let parsed =
            SensorTopic::parse(topic).ok_or_else(|| IngestError::UnknownTopic(topic.to_string()))?;
        tracing::debug!(topic, payload, "Received sensor message");

        match parsed {
            SensorTopic::Status(topic_id) => {
                let mut status: SensorPayload = serde_json::from_str(payload)?;
                if status.sensor_id.is_none() {
                    status.sensor_id = Some(topic_id.as_str().to_string());
                } else if status.sensor_id.as_deref() != Some(topic_id.as_str()) {
                    tracing::warn!(
                        topic_sensor = %topic_id,
                        payload_sensor = ?status.sensor_id,
                        "Sensor id in payload differs from topic; using payload"
                    );
                }
                let reading = status.into_reading()?;
                Ok(IngestOutcome::Reconciled(self.engine.ingest(reading)))
            }
            SensorTopic::Heartbeat(topic_id) => {
                let heartbeat: HeartbeatPayload = serde_json::from_str(payload)?;
                let sensor_id = heartbeat.sensor_id.map_or(topic_id, SpotId::new);
                tracing::debug!(sensor_id = %sensor_id, status = ?heartbeat.status, "Sensor heartbeat");
                Ok(IngestOutcome::Heartbeat {
                    sensor_id,
                    status: heartbeat.status,
                })
            }
            SensorTopic::Error(topic_id) => {
                let fault: FaultPayload = serde_json::from_str(payload)?;
                let sensor_id = fault.sensor_id.map_or(topic_id, SpotId::new);
                tracing::warn!(
                    sensor_id = %sensor_id,
                    error = ?fault.error,
                    timestamp = ?fault.timestamp,
                    "Sensor reported an error"
                );
                Ok(IngestOutcome::SensorFault {
                    sensor_id,
                    error: fault.error,
                })
            }
        }
    }

    /// Counts a status reading that arrived over `POST /api/sensor-data`
    pub fn record_direct(&self, accepted: bool) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let result = if accepted {
            self.processed.fetch_add(1, Ordering::Relaxed);
            "processed"
        } else {
            self.errors.fetch_add(1, Ordering::Relaxed);
            "error"
        };
        counter!("spotwatch_ingest_messages_total", "result" => result).increment(1);
    }

    /// Current counters
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> IngestStats {
        let received = self.received.load(Ordering::Relaxed);
        let processed = self.processed.load(Ordering::Relaxed);
        IngestStats {
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
            messages_received: received,
            messages_processed: processed,
            errors_count: self.errors.load(Ordering::Relaxed),
            success_rate: if received == 0 {
                0.0
            } else {
                processed as f64 / received as f64 * 100.0
            },
        }
    }
}
