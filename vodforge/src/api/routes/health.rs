//! Health check routes.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::api::server::AppState;
use crate::health::HealthReport;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
}

/// Liveness check response.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct LivenessResponse {
    /// Status indicator (always "alive" if responding)
    pub status: String,
    /// Server uptime in seconds
    pub uptime_secs: u64,
}

#[utoipa::path(
    get,
    path = "/api/health/live",
    tag = "health",
    responses((status = 200, description = "Process is alive", body = LivenessResponse))
)]
pub async fn liveness(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

#[utoipa::path(
    get,
    path = "/api/health/ready",
    tag = "health",
    responses((status = 200, description = "Engine health roll-up", body = HealthReport))
)]
pub async fn readiness(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.health_monitor.report())
}
