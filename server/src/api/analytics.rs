//! Occupancy analytics.

use crate::server::state::AppState;
use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;
use spotwatch_core::registry::LevelOccupancy;

/// Occupancy of one level
#[derive(Debug, Serialize)]
pub struct LevelBreakdown {
    /// Level name
    pub level: String,
    /// Counts for the level
    #[serde(flatten)]
    pub occupancy: LevelOccupancy,
}

/// Facility occupancy
#[derive(Debug, Serialize)]
pub struct OccupancyResponse {
    /// Totals across every level
    pub overall: LevelOccupancy,
    /// Per-level breakdown, sorted by level
    pub by_level: Vec<LevelBreakdown>,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
}

/// Current occupancy statistics.
///
/// ```bash
/// curl http://localhost:5000/api/analytics/occupancy
/// # {"overall":{"total":4,"occupied":1,"reserved":1,"available":2,"occupancy_rate":25.0},...}
/// ```
pub async fn occupancy(State(state): State<AppState>) -> Json<OccupancyResponse> {
    let summary = state.engine.occupancy();
    Json(OccupancyResponse {
        overall: summary.overall,
        by_level: summary
            .by_level
            .into_iter()
            .map(|(level, occupancy)| LevelBreakdown { level, occupancy })
            .collect(),
        timestamp: Utc::now(),
    })
}
