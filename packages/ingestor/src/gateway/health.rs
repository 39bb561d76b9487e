//! Health and stats endpoints.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::pipeline::StatsSnapshot;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Liveness probe. Does not touch the store or the queue.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Pipeline outcome counters since startup.
pub async fn stats_handler(State(app_state): State<AppState>) -> Json<StatsSnapshot> {
    Json(app_state.pipeline().stats())
}
