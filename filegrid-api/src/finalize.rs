//! Finalize endpoints: start a promotion, poll its progress.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use filegrid_core::FinalizeTransaction;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::middleware::AuthContext;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct FinalizeStatusResponse {
    pub transaction_id: Uuid,
    pub file_id: Uuid,
    pub source_element_id: String,
    pub target_element_id: String,
    pub status: String,
    pub progress_percent: u8,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<FinalizeTransaction> for FinalizeStatusResponse {
    fn from(tx: FinalizeTransaction) -> Self {
        Self {
            transaction_id: tx.transaction_id,
            file_id: tx.file_id,
            source_element_id: tx.source_element_id,
            target_element_id: tx.target_element_id,
            status: tx.status.to_string(),
            progress_percent: tx.status.progress_percent(),
            retry_count: tx.retry_count,
            error_code: tx.error_code,
            error_message: tx.error_message,
            started_at: tx.started_at,
            updated_at: tx.updated_at,
            completed_at: tx.completed_at,
        }
    }
}

/// `POST /api/v1/finalize/{file_id}` — 202; the phases run asynchronously.
pub async fn start(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(file_id): Path<Uuid>,
) -> Result<(StatusCode, Json<FinalizeStatusResponse>), ApiError> {
    let transaction = state.finalize.finalize(file_id).await?;
    state.audit.record(
        auth.display_name(),
        "finalize",
        format!("file:{file_id}"),
        "accepted",
    );
    info!(%file_id, transaction_id = %transaction.transaction_id, "finalize accepted");
    Ok((StatusCode::ACCEPTED, Json(transaction.into())))
}

/// `GET /api/v1/finalize/{transaction_id}/status`.
pub async fn status(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<FinalizeStatusResponse>, ApiError> {
    let transaction = state.finalize.status(&transaction_id)?;
    Ok(Json(transaction.into()))
}
