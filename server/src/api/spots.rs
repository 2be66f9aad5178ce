//! Parking spot endpoints.
//!
//! - GET /api/spots - every spot with status counts
//! - POST /api/spots - provision a spot
//! - GET /api/spots/available - free spots, filtered by level and zone
//! - GET /api/spots/:id - one spot with its recent readings

use crate::error::AppError;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use spotwatch_core::registry::ReadingRecord;
use spotwatch_core::types::{Spot, SpotDefaults, SpotId, SpotStatus};

// ============================================================================
// Request/Response Types
// ============================================================================

/// A spot with its derived status
#[derive(Debug, Serialize)]
pub struct SpotView {
    /// Stored spot state
    #[serde(flatten)]
    pub spot: Spot,
    /// `occupied`, `reserved` or `available`
    pub status: SpotStatus,
}

impl From<Spot> for SpotView {
    fn from(spot: Spot) -> Self {
        let status = spot.status();
        Self { spot, status }
    }
}

/// All spots with status counts
#[derive(Debug, Serialize)]
pub struct SpotsResponse {
    /// Every spot, sorted by id
    pub spots: Vec<SpotView>,
    /// Number of spots
    pub total_count: usize,
    /// Neither occupied nor reserved
    pub available_count: usize,
    /// Vehicle present
    pub occupied_count: usize,
    /// Held by a reservation
    pub reserved_count: usize,
}

/// Request to provision a spot
#[derive(Debug, Deserialize)]
pub struct ProvisionSpotRequest {
    /// Spot id (equal to its sensor id)
    pub id: Option<String>,
    /// Descriptive fields; defaults apply to any that are missing
    #[serde(flatten)]
    pub defaults: SpotDefaults,
}

/// Filters for available spots
#[derive(Debug, Default, Deserialize)]
pub struct AvailabilityQuery {
    /// Only this level
    pub level: Option<String>,
    /// Only this zone
    pub zone: Option<String>,
}

/// Available spots
#[derive(Debug, Serialize)]
pub struct AvailableSpotsResponse {
    /// Matching spots
    pub available_spots: Vec<SpotView>,
    /// Number of matching spots
    pub count: usize,
}

/// One spot with recent readings
#[derive(Debug, Serialize)]
pub struct SpotDetailResponse {
    /// Current spot state
    pub spot: SpotView,
    /// Newest readings first
    pub recent_sensor_data: Vec<ReadingRecord>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List every spot.
pub async fn list_spots(State(state): State<AppState>) -> Json<SpotsResponse> {
    let spots = state.engine.spots();
    let total_count = spots.len();
    let available_count = spots.iter().filter(|spot| spot.is_available()).count();
    let occupied_count = spots.iter().filter(|spot| spot.occupied).count();
    let reserved_count = spots.iter().filter(|spot| spot.reserved).count();

    Json(SpotsResponse {
        spots: spots.into_iter().map(SpotView::from).collect(),
        total_count,
        available_count,
        occupied_count,
        reserved_count,
    })
}

/// Provision a spot.
///
/// Returns 201 with the spot. Provisioning an existing spot returns it
/// unchanged; descriptive fields are fixed at creation.
///
/// # Example
///
/// ```bash
/// curl -X POST http://localhost:5000/api/spots \
///   -H "Content-Type: application/json" \
///   -d '{"id":"P1","location":"Level_1_Spot_A1","level":"L1","zone":"A"}'
/// ```
pub async fn provision_spot(
    State(state): State<AppState>,
    Json(request): Json<ProvisionSpotRequest>,
) -> Result<(StatusCode, Json<SpotView>), AppError> {
    let id = request
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("Missing required fields"))?;
    let spot = state.engine.provision(&SpotId::new(id), &request.defaults);
    tracing::info!(spot_id = %spot.id, level = %spot.level, zone = %spot.zone, "Spot provisioned");
    Ok((StatusCode::CREATED, Json(SpotView::from(spot))))
}

/// List available spots.
pub async fn available_spots(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> Json<AvailableSpotsResponse> {
    let spots = state
        .engine
        .available_spots(query.level.as_deref(), query.zone.as_deref());
    Json(AvailableSpotsResponse {
        count: spots.len(),
        available_spots: spots.into_iter().map(SpotView::from).collect(),
    })
}

/// Fetch one spot.
pub async fn get_spot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SpotDetailResponse>, AppError> {
    let id = SpotId::new(id);
    let spot = state
        .engine
        .spot(&id)
        .ok_or_else(|| AppError::not_found("Spot", &id))?;
    let recent_sensor_data = state
        .engine
        .recent_readings(&id, state.recent_readings_limit);
    Ok(Json(SpotDetailResponse {
        spot: SpotView::from(spot),
        recent_sensor_data,
    }))
}
