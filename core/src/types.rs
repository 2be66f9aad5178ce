//! Domain types for the parking engine.
//!
//! Identifiers, money, spots, sensor readings and reservations. Everything here
//! is plain owned data; the registry and arbiter decide who may mutate it.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Identity of a parking spot. Sensors report under the same key, so a
/// sensor id and a spot id are interchangeable (e.g. `PARK_001`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpotId(String);

impl SpotId {
    /// Creates a `SpotId` from any string-like value
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SpotId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SpotId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Unique identifier for a reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Creates a new random `ReservationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ReservationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque payment handle issued by the payment collaborator
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentIntentId(String);

impl PaymentIntentId {
    /// Wraps a provider-issued intent id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentIntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Returns the amount in currency units (e.g. `4.0` for 400 cents)
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // amounts stay far below 2^52 cents
    pub fn as_decimal(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Multiplies an hourly rate by a (possibly fractional) number of hours,
    /// rounding to the nearest cent.
    ///
    /// Returns `None` when the hours are not a finite non-negative number or
    /// the result does not fit.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn checked_mul_hours(self, hours: f64) -> Option<Self> {
        if !hours.is_finite() || hours < 0.0 {
            return None;
        }
        let cents = (self.0 as f64 * hours).round();
        if !cents.is_finite() || cents >= u64::MAX as f64 {
            return None;
        }
        Some(Self(cents as u64))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Spots
// ============================================================================

/// Sensor hardware fitted to spots created from a reading
pub const DEFAULT_SENSOR_TYPE: &str = "ultrasonic";

/// Optional descriptive fields supplied when a spot is first seen.
///
/// Only consulted when the spot does not exist yet; descriptive fields are
/// immutable after creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotDefaults {
    /// Human-readable location (e.g. `Level_1_Spot_A1`)
    #[serde(default)]
    pub location: Option<String>,
    /// Level (e.g. `L1`)
    #[serde(default)]
    pub level: Option<String>,
    /// Zone (e.g. `A`)
    #[serde(default)]
    pub zone: Option<String>,
}

impl SpotDefaults {
    /// Defaults with every field set
    #[must_use]
    pub fn new(
        location: impl Into<String>,
        level: impl Into<String>,
        zone: impl Into<String>,
    ) -> Self {
        Self {
            location: Some(location.into()),
            level: Some(level.into()),
            zone: Some(zone.into()),
        }
    }
}

/// Derived availability of a spot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpotStatus {
    /// Free and unreserved
    Available,
    /// A vehicle is present
    Occupied,
    /// Held by an active reservation
    Reserved,
}

impl fmt::Display for SpotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => f.write_str("available"),
            Self::Occupied => f.write_str("occupied"),
            Self::Reserved => f.write_str("reserved"),
        }
    }
}

/// A single physical parking location
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    /// Spot identity
    pub id: SpotId,
    /// Human-readable location
    pub location: String,
    /// Level
    pub level: String,
    /// Zone
    pub zone: String,
    /// Sensor hardware type
    pub sensor_type: String,
    /// Whether a vehicle is present
    pub occupied: bool,
    /// Whether an active reservation holds the spot
    pub reserved: bool,
    /// Timestamp of the newest applied reading (`None` until the first one)
    pub last_updated: Option<DateTime<Utc>>,
    /// When the spot was first seen
    pub created_at: DateTime<Utc>,
}

impl Spot {
    /// Creates an unoccupied, unreserved spot. Missing descriptive fields
    /// fall back to `Unknown_<id>` / `L1` / `A`.
    #[must_use]
    pub fn new(id: SpotId, defaults: &SpotDefaults, created_at: DateTime<Utc>) -> Self {
        let location = defaults
            .location
            .clone()
            .unwrap_or_else(|| format!("Unknown_{id}"));
        Self {
            location,
            level: defaults.level.clone().unwrap_or_else(|| "L1".to_string()),
            zone: defaults.zone.clone().unwrap_or_else(|| "A".to_string()),
            sensor_type: DEFAULT_SENSOR_TYPE.to_string(),
            id,
            occupied: false,
            reserved: false,
            last_updated: None,
            created_at,
        }
    }

    /// Occupancy wins over reservation when both flags are set
    #[must_use]
    pub const fn status(&self) -> SpotStatus {
        if self.occupied {
            SpotStatus::Occupied
        } else if self.reserved {
            SpotStatus::Reserved
        } else {
            SpotStatus::Available
        }
    }

    /// Neither occupied nor reserved
    #[must_use]
    pub const fn is_available(&self) -> bool {
        !self.occupied && !self.reserved
    }
}

// ============================================================================
// Sensor readings
// ============================================================================

/// Free-form telemetry attached to a reading. Archived, never interpreted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Measured distance to the nearest obstacle
    #[serde(default)]
    pub distance_cm: Option<f64>,
    /// Battery percentage as reported by the sensor
    #[serde(default)]
    pub battery_level: Option<i64>,
    /// Radio signal strength (dBm)
    #[serde(default)]
    pub signal_strength: Option<i64>,
}

/// One occupancy observation from a sensor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Reporting sensor, equal to the spot id
    pub sensor_id: SpotId,
    /// When the sensor took the measurement (the ordering key)
    pub timestamp: DateTime<Utc>,
    /// Whether a vehicle was detected
    pub occupied: bool,
    /// Opaque telemetry
    #[serde(default)]
    pub telemetry: Telemetry,
    /// Descriptive fields used only if the spot is unknown
    #[serde(default)]
    pub placement: SpotDefaults,
}

impl SensorReading {
    /// Creates a reading without telemetry or placement hints
    #[must_use]
    pub fn new(sensor_id: impl Into<SpotId>, occupied: bool, timestamp: DateTime<Utc>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            timestamp,
            occupied,
            telemetry: Telemetry::default(),
            placement: SpotDefaults::default(),
        }
    }

    /// Attaches telemetry
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Attaches placement hints for lazy spot creation
    #[must_use]
    pub fn with_placement(mut self, placement: SpotDefaults) -> Self {
        self.placement = placement;
        self
    }
}

/// Parses an ISO-8601 instant.
///
/// Accepts RFC 3339 (`2025-01-01T10:00:00Z`, `...+02:00`) and naive
/// timestamps without an offset, which are taken as UTC.
#[must_use]
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Reservations
// ============================================================================

/// Reservation lifecycle. `Active` is the only non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Holding the spot
    Active,
    /// Window ended after payment
    Completed,
    /// Cancelled by the requester or rolled back
    Cancelled,
    /// Window ended without payment
    Expired,
}

impl ReservationStatus {
    /// No transition leaves a terminal state
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Completed => f.write_str("completed"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Expired => f.write_str("expired"),
        }
    }
}

/// Payment state recorded on a reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Intent requested, not yet confirmed
    Pending,
    /// Confirmed by the payment callback
    Paid,
    /// Intent creation or charge failed
    Failed,
    /// Refunded after cancellation
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Paid => f.write_str("paid"),
            Self::Failed => f.write_str("failed"),
            Self::Refunded => f.write_str("refunded"),
        }
    }
}

/// A time-boxed hold on a spot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identity
    pub id: ReservationId,
    /// Reserved spot
    pub spot_id: SpotId,
    /// Requester contact
    pub user_email: String,
    /// Optional requester phone
    pub user_phone: Option<String>,
    /// Start of the window
    pub start_time: DateTime<Utc>,
    /// End of the window (`start_time + duration_hours`)
    pub end_time: DateTime<Utc>,
    /// Requested duration
    pub duration_hours: f64,
    /// `duration_hours * hourly_rate`
    pub total_amount: Money,
    /// Payment state
    pub payment_status: PaymentStatus,
    /// Payment handle, once the collaborator issued one
    pub payment_intent_id: Option<PaymentIntentId>,
    /// Lifecycle state
    pub status: ReservationStatus,
    /// When the reservation was granted
    pub created_at: DateTime<Utc>,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

/// Inbound reservation request.
///
/// `start_time` stays raw so that parse failures are reported in validation
/// order, after the availability checks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReservationRequest {
    /// Spot to reserve
    pub spot_id: SpotId,
    /// Requester contact
    pub user_email: String,
    /// Optional requester phone
    #[serde(default)]
    pub user_phone: Option<String>,
    /// ISO-8601 start of the window
    pub start_time: String,
    /// Length of the window in hours
    pub duration_hours: f64,
}

/// A granted reservation plus the payment handle the client completes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReservationGrant {
    /// The active reservation
    pub reservation: Reservation,
    /// Secret the client uses to complete the payment intent
    pub client_secret: String,
}
