//! Multipart upload endpoint.

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use bytes::Bytes;
use filegrid_core::{CompressionAlgorithm, RetentionPolicy};
use filegrid_ingester::{UploadReceipt, UploadRequest};
use tracing::info;

use crate::errors::ApiError;
use crate::middleware::AuthContext;
use crate::AppState;

/// `POST /api/v1/upload` — multipart fields: `file` (required),
/// `description`, `storage_mode` (`edit` default, or `rw`), `compress`,
/// `compression_algorithm` (`gzip`/`brotli`), `tags` (comma-separated).
pub async fn upload(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadReceipt>), ApiError> {
    let mut file: Option<(String, String, Bytes)> = None;
    let mut description: Option<String> = None;
    let mut storage_mode = "edit".to_string();
    let mut compress = false;
    let mut compression_algorithm: Option<CompressionAlgorithm> = None;
    let mut tags: Vec<String> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("malformed multipart body: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::BadRequest("file field is missing a filename".into()))?;
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::BadRequest(format!("failed to read file body: {err}")))?;
                file = Some((filename, content_type, bytes));
            }
            "description" => {
                description = Some(read_text(field).await?).filter(|text| !text.is_empty());
            }
            "storage_mode" => storage_mode = read_text(field).await?,
            "compress" => {
                let value = read_text(field).await?;
                compress = matches!(value.as_str(), "true" | "1" | "yes");
            }
            "compression_algorithm" => {
                let value = read_text(field).await?;
                compression_algorithm = Some(match value.as_str() {
                    "gzip" => CompressionAlgorithm::Gzip,
                    "brotli" => CompressionAlgorithm::Brotli,
                    other => {
                        return Err(ApiError::BadRequest(format!(
                            "unknown compression algorithm {other:?}"
                        )))
                    }
                });
            }
            "tags" => {
                tags = read_text(field)
                    .await?
                    .split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {}
        }
    }

    let (original_filename, content_type, body) =
        file.ok_or_else(|| ApiError::BadRequest("multipart field 'file' is required".into()))?;

    let retention_policy = match storage_mode.as_str() {
        "edit" => RetentionPolicy::Temporary,
        "rw" => RetentionPolicy::Permanent,
        other => {
            return Err(ApiError::BadRequest(format!(
                "storage_mode must be 'edit' or 'rw', got {other:?}"
            )))
        }
    };

    let receipt = state
        .upload
        .upload(
            UploadRequest {
                original_filename,
                content_type,
                username: auth.display_name(),
                description,
                tags,
                retention_policy,
                compress,
                compression_algorithm,
            },
            body,
        )
        .await?;

    state.audit.record(
        auth.display_name(),
        "upload",
        format!("file:{}", receipt.file_id),
        "success",
    );
    info!(file_id = %receipt.file_id, uploader = %auth.display_name(), "upload accepted");
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map(|text| text.trim().to_string())
        .map_err(|err| ApiError::BadRequest(format!("unreadable multipart field: {err}")))
}
