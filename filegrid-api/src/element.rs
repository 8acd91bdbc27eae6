//! Storage element endpoints: discovery, capacity, mode, deletes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use filegrid_core::{ElementRegistration, StorageMode};
use filegrid_security::AuthError;
use filegrid_storage::{CapacityReport, ElementInfo, ModeTransition};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::middleware::AuthContext;
use crate::AppState;

/// `GET /api/v1/elements` — registrations of every known element.
pub async fn list(State(state): State<AppState>) -> Json<Vec<ElementRegistration>> {
    Json(state.directory.registrations())
}

/// `GET /api/v1/elements/{id}/info` — unauthenticated auto-discovery.
pub async fn info(
    State(state): State<AppState>,
    Path(element_id): Path<String>,
) -> Result<Json<ElementInfo>, ApiError> {
    let element = state.directory.require(&element_id)?;
    Ok(Json(element.info()))
}

/// `GET /api/v1/elements/{id}/capacity` — polled by the capacity monitor.
pub async fn capacity(
    State(state): State<AppState>,
    Path(element_id): Path<String>,
) -> Result<Json<CapacityReport>, ApiError> {
    let element = state.directory.require(&element_id)?;
    Ok(Json(element.capacity_report()))
}

#[derive(Debug, Serialize)]
pub struct ModeInfo {
    pub element_id: String,
    pub mode: StorageMode,
    pub possible_transitions: Vec<StorageMode>,
    pub history: Vec<ModeTransition>,
}

/// `GET /api/v1/elements/{id}/mode`.
pub async fn mode(
    State(state): State<AppState>,
    Path(element_id): Path<String>,
) -> Result<Json<ModeInfo>, ApiError> {
    let element = state.directory.require(&element_id)?;
    Ok(Json(ModeInfo {
        element_id,
        mode: element.current_mode(),
        possible_transitions: element.mode().possible_transitions(),
        history: element.mode().history(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ModeTransitionRequest {
    pub target_mode: StorageMode,
    pub reason: Option<String>,
}

/// `PUT /api/v1/elements/{id}/mode` — guarded mode transition.
pub async fn transition_mode(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(element_id): Path<String>,
    Json(request): Json<ModeTransitionRequest>,
) -> Result<Json<ModeInfo>, ApiError> {
    let element = state.directory.require(&element_id)?;
    let transition = element
        .mode()
        .transition_to(request.target_mode, request.reason)?;
    state.audit.record(
        auth.display_name(),
        "mode_transition",
        format!("element:{element_id}"),
        format!("{} -> {}", transition.from, transition.to),
    );
    Ok(Json(ModeInfo {
        element_id,
        mode: element.current_mode(),
        possible_transitions: element.mode().possible_transitions(),
        history: element.mode().history(),
    }))
}

/// `DELETE /api/v1/elements/{id}/files/{file_id}` — client-facing delete,
/// legal only where the element's mode permits it.
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((element_id, file_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let element = state.directory.require(&element_id)?;
    element.delete_file(file_id).await?;
    state.audit.record(
        auth.display_name(),
        "delete",
        format!("file:{file_id}"),
        "success",
    );
    info!(%file_id, element = %element_id, "file deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/v1/elements/{id}/gc/{file_id}` — deferred-GC entry point,
/// restricted to service accounts.
pub async fn gc_delete_file(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((element_id, file_id)): Path<(String, Uuid)>,
) -> Result<StatusCode, ApiError> {
    if !auth.is_service_account() {
        return Err(ApiError::Auth(AuthError::AccessDenied {
            reason: "gc delete requires a service account".into(),
        }));
    }
    let element = state.directory.require(&element_id)?;
    element.gc_delete(file_id).await?;
    state.audit.record(
        auth.display_name(),
        "gc_delete",
        format!("file:{file_id}"),
        "success",
    );
    Ok(StatusCode::NO_CONTENT)
}
