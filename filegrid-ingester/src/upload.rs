//! Upload orchestration.
//!
//! The ingester validates the body, optionally compresses it, walks the
//! selector's candidate list (invalidating and advancing on an
//! insufficient-space answer), and registers the stored file with the
//! control plane — which publishes `file:created` on commit.

use bytes::Bytes;
use chrono::{Duration, Utc};
use filegrid_core::{CompressionAlgorithm, FileRecord, RetentionPolicy, UploadConfig};
use filegrid_admin::{ElementDirectory, FileRegistry};
use filegrid_storage::{bytes_stream, StorageError, StoreRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::compression::compress;
use crate::errors::IngestError;
use crate::selector::StorageSelector;

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub original_filename: String,
    pub content_type: String,
    pub username: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub retention_policy: RetentionPolicy,
    pub compress: bool,
    pub compression_algorithm: Option<CompressionAlgorithm>,
}

/// What the client gets back from a successful upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub file_id: Uuid,
    pub original_filename: String,
    pub storage_filename: String,
    pub file_size: u64,
    pub checksum: String,
    pub uploaded_at: chrono::DateTime<Utc>,
    pub storage_element_url: String,
    pub compressed: bool,
    pub compression_algorithm: Option<String>,
}

pub struct UploadService {
    selector: Arc<StorageSelector>,
    directory: Arc<ElementDirectory>,
    files: Arc<FileRegistry>,
    config: UploadConfig,
}

impl UploadService {
    pub fn new(
        selector: Arc<StorageSelector>,
        directory: Arc<ElementDirectory>,
        files: Arc<FileRegistry>,
        config: UploadConfig,
    ) -> Self {
        Self {
            selector,
            directory,
            files,
            config,
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.config.max_file_size
    }

    pub async fn upload(
        &self,
        request: UploadRequest,
        body: Bytes,
    ) -> Result<UploadReceipt, IngestError> {
        if body.len() as u64 > self.config.max_file_size {
            return Err(IngestError::FileTooLarge {
                size: body.len() as u64,
                max: self.config.max_file_size,
            });
        }

        let algorithm = request
            .compression_algorithm
            .unwrap_or(self.config.compression_algorithm);
        let (payload, compressed) = if request.compress {
            (compress(&body, algorithm)?, true)
        } else {
            (body, false)
        };

        let candidates = self
            .selector
            .select(request.retention_policy, payload.len() as u64)?;

        let file_id = Uuid::new_v4();
        let ttl_expires_at = match request.retention_policy {
            RetentionPolicy::Temporary => {
                Some(Utc::now() + Duration::hours(self.config.temporary_ttl_hours as i64))
            }
            RetentionPolicy::Permanent => None,
        };

        for element_id in candidates {
            let Some(element) = self.directory.get(&element_id) else {
                warn!(element = %element_id, "selected element not in directory; trying next");
                continue;
            };
            let store_request = StoreRequest {
                file_id,
                original_filename: request.original_filename.clone(),
                content_type: request.content_type.clone(),
                uploaded_by: request.username.clone(),
                retention_policy: request.retention_policy,
                ttl_expires_at,
                description: request.description.clone(),
                tags: request.tags.clone(),
                compressed,
                compression_algorithm: compressed.then(|| algorithm.as_str().to_string()),
                storage_filename: None,
            };
            match element
                .store_file(store_request, bytes_stream(payload.clone()))
                .await
            {
                Ok(stored) => {
                    let record = FileRecord {
                        file_id,
                        original_filename: request.original_filename.clone(),
                        storage_filename: stored.storage_filename.clone(),
                        file_size: stored.file_size,
                        checksum_sha256: stored.checksum_sha256.clone(),
                        content_type: request.content_type.clone(),
                        retention_policy: request.retention_policy,
                        ttl_expires_at,
                        finalized_at: None,
                        storage_element_id: element_id.clone(),
                        storage_path: stored.storage_path.clone(),
                        uploaded_by: request.username.clone(),
                        description: request.description.clone(),
                        tags: request.tags.clone(),
                        created_at: stored.stored_at,
                        updated_at: stored.stored_at,
                        deleted_at: None,
                    };
                    self.files.register(record)?;
                    info!(%file_id, element = %element_id, size = stored.file_size, "upload complete");
                    return Ok(UploadReceipt {
                        file_id,
                        original_filename: request.original_filename,
                        storage_filename: stored.storage_filename,
                        file_size: stored.file_size,
                        checksum: stored.checksum_sha256,
                        uploaded_at: stored.stored_at,
                        storage_element_url: element.api_url().to_string(),
                        compressed,
                        compression_algorithm: compressed.then(|| algorithm.as_str().to_string()),
                    });
                }
                Err(StorageError::InsufficientSpace { needed, available }) => {
                    // The element is fuller than its published record said.
                    // Invalidate and move on; the record refreshes next poll.
                    warn!(
                        element = %element_id,
                        needed,
                        available,
                        "element answered insufficient-space; advancing to next candidate"
                    );
                    self.selector.invalidate_candidate(&element_id);
                    continue;
                }
                Err(StorageError::ModeForbidden { mode, .. }) => {
                    // Stale index: the element changed mode since the poll.
                    warn!(element = %element_id, %mode, "element mode no longer accepts creates");
                    self.selector.invalidate_candidate(&element_id);
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(IngestError::NoAvailableStorage)
    }
}
