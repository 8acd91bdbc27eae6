//! Liveness and readiness endpoints.
//!
//! `/health/live` answers 200 while the process runs. `/health/ready` reads
//! only the aggregator's cached state, never performing I/O on the probe
//! path.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use filegrid_admin::{HealthState, HealthStatus};

use crate::AppState;

pub async fn live() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<HealthState>) {
    let health = state.health.ready();
    let status = match health.status {
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Fail => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(health))
}
