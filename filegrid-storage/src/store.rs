//! The storage element: mode-guarded file persistence.
//!
//! Upload sequence: mode check → stream to a temporary path while hashing →
//! atomic rename into the `YYYY/MM/DD/HH` bucket → attribute sidecar →
//! WAL row → catalog update. The sidecar is authoritative; everything after
//! it is rebuildable.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use filegrid_core::{
    ElementConfig, ElementRegistration, ElementStatus, FileId, Operation, RetentionPolicy,
    StorageMode, StorageType,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::{bytes_stream, ByteStream, FileStat, LocalBackend, StorageBackend, WriteLimits};
use crate::capacity::{CapacityCalculator, CapacityReport};
use crate::catalog::{CatalogRow, MetadataCatalog};
use crate::errors::StorageError;
use crate::mode::ModeStateMachine;
use crate::naming::{generate_storage_filename, storage_prefix};
use crate::sidecar::{sidecar_rel_path, FileAttributes};
use crate::wal::{WalOperation, WalRecord, WriteAheadLog};

const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// What a caller must provide to persist a file.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub file_id: FileId,
    pub original_filename: String,
    pub content_type: String,
    pub uploaded_by: String,
    pub retention_policy: RetentionPolicy,
    pub ttl_expires_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub compressed: bool,
    pub compression_algorithm: Option<String>,
    /// Preserve an existing storage filename; finalize copies reuse the name
    /// minted at upload time so the record stays recognizable across moves.
    pub storage_filename: Option<String>,
}

/// Receipt for a persisted file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    pub file_id: FileId,
    pub storage_filename: String,
    pub storage_path: String,
    pub file_size: u64,
    pub checksum_sha256: String,
    pub stored_at: DateTime<Utc>,
}

/// Body of the element's discovery endpoint. Every field is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementInfo {
    pub name: String,
    pub display_name: String,
    pub version: String,
    pub mode: StorageMode,
    pub storage_type: StorageType,
    pub base_path: String,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub file_count: u64,
    pub status: ElementStatus,
    pub priority: u32,
    pub element_id: String,
}

/// A single-node file persistence service.
pub struct StorageElement {
    config: ElementConfig,
    mode: ModeStateMachine,
    backend: Arc<dyn StorageBackend>,
    catalog: MetadataCatalog,
    wal: WriteAheadLog,
    capacity: CapacityCalculator,
    max_file_size: u64,
    _db: sled::Db,
}

impl StorageElement {
    /// Open (or create) the element rooted at `config.root`. Bookkeeping
    /// lives under `.meta/` inside the root, outside the object space.
    pub async fn open(config: ElementConfig, default_max_file_size: u64) -> Result<Arc<Self>, StorageError> {
        let backend = Arc::new(LocalBackend::new(&config.root)?);
        let meta_dir = config.root.join(".meta");
        std::fs::create_dir_all(&meta_dir)?;
        let db = sled::open(meta_dir.join("catalog"))?;
        let catalog = MetadataCatalog::open(&db)?;
        let wal = WriteAheadLog::open(meta_dir.join("element.wal")).await?;
        let capacity = CapacityCalculator::new(config.capacity_bytes);
        capacity.set_used(catalog.total_used_bytes()?);
        let max_file_size = config.max_file_size.unwrap_or(default_max_file_size);
        Ok(Arc::new(Self {
            mode: ModeStateMachine::new(config.element_id.clone(), config.mode),
            backend,
            catalog,
            wal,
            capacity,
            max_file_size,
            config,
            _db: db,
        }))
    }

    /// Reconcile the catalog from sidecars and refresh usage accounting.
    pub async fn start(&self) -> Result<(), StorageError> {
        let report = self.catalog.reconcile(self.backend.as_ref()).await?;
        if !report.orphan_data_files.is_empty() {
            warn!(
                element = %self.config.element_id,
                orphans = report.orphan_data_files.len(),
                "orphan data files found during startup reconciliation"
            );
        }
        self.capacity.set_used(self.catalog.total_used_bytes()?);
        info!(
            element = %self.config.element_id,
            mode = %self.mode.current(),
            files = self.catalog.len(),
            "storage element started"
        );
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), StorageError> {
        self._db.flush()?;
        Ok(())
    }

    pub fn element_id(&self) -> &str {
        &self.config.element_id
    }

    pub fn api_url(&self) -> &str {
        &self.config.api_url
    }

    pub fn priority(&self) -> u32 {
        self.config.priority
    }

    pub fn mode(&self) -> &ModeStateMachine {
        &self.mode
    }

    pub fn current_mode(&self) -> StorageMode {
        self.mode.current()
    }

    /// Persist a new file. Returns 507-mapped [`StorageError::InsufficientSpace`]
    /// when the element cannot hold the body.
    pub async fn store_file(
        &self,
        request: StoreRequest,
        body: ByteStream,
    ) -> Result<StoredFile, StorageError> {
        self.mode.validate_operation(Operation::Create)?;

        let available = self.capacity.available();
        if available == 0 {
            return Err(StorageError::InsufficientSpace {
                needed: 1,
                available: 0,
            });
        }

        let now = Utc::now();
        let storage_filename = match request.storage_filename.clone() {
            Some(name) => name,
            None => generate_storage_filename(
                &request.original_filename,
                &request.uploaded_by,
                now,
                request.file_id,
            )?,
        };
        let prefix = storage_prefix(now);
        let rel_path = format!("{prefix}/{storage_filename}");

        let receipt = self
            .backend
            .write_stream(
                &rel_path,
                body,
                WriteLimits {
                    max_size: Some(self.max_file_size),
                    available: Some(available),
                },
            )
            .await?;

        let attributes = FileAttributes {
            file_id: request.file_id,
            original_filename: request.original_filename,
            storage_filename: storage_filename.clone(),
            file_size: receipt.size,
            checksum_sha256: receipt.checksum_sha256.clone(),
            content_type: request.content_type,
            retention_policy: request.retention_policy,
            ttl_expires_at: request.ttl_expires_at,
            uploaded_by: request.uploaded_by,
            description: request.description,
            tags: request.tags,
            compressed: request.compressed,
            compression_algorithm: request.compression_algorithm,
            created_at: now,
            updated_at: now,
        };
        self.write_sidecar(&rel_path, &attributes).await?;

        self.wal
            .append(&WalRecord::committed(
                request.file_id,
                WalOperation::Upload,
                serde_json::json!({
                    "file_id": request.file_id,
                    "storage_filename": storage_filename,
                    "size": receipt.size,
                    "checksum": receipt.checksum_sha256,
                }),
            ))
            .await?;

        self.catalog.upsert(&CatalogRow {
            attributes,
            rel_path,
        })?;
        self.capacity.add(receipt.size);

        info!(
            element = %self.config.element_id,
            file_id = %request.file_id,
            size = receipt.size,
            "file stored"
        );
        Ok(StoredFile {
            file_id: request.file_id,
            storage_filename,
            storage_path: prefix,
            file_size: receipt.size,
            checksum_sha256: receipt.checksum_sha256,
            stored_at: now,
        })
    }

    /// Replace the bytes of an existing file in place.
    pub async fn update_file(
        &self,
        file_id: FileId,
        body: ByteStream,
    ) -> Result<StoredFile, StorageError> {
        self.mode.validate_operation(Operation::Update)?;
        let row = self.row(&file_id)?;
        let old_size = row.attributes.file_size;

        let receipt = self
            .backend
            .write_stream(
                &row.rel_path,
                body,
                WriteLimits {
                    max_size: Some(self.max_file_size),
                    available: Some(self.capacity.available().saturating_add(old_size)),
                },
            )
            .await?;

        let mut attributes = row.attributes;
        attributes.file_size = receipt.size;
        attributes.checksum_sha256 = receipt.checksum_sha256.clone();
        attributes.updated_at = Utc::now();
        self.write_sidecar(&row.rel_path, &attributes).await?;

        self.wal
            .append(&WalRecord::committed(
                file_id,
                WalOperation::Update,
                serde_json::json!({ "file_id": file_id, "size": receipt.size }),
            ))
            .await?;

        let storage_filename = attributes.storage_filename.clone();
        let storage_path = row
            .rel_path
            .rsplit_once('/')
            .map(|(prefix, _)| prefix.to_string())
            .unwrap_or_default();
        self.catalog.upsert(&CatalogRow {
            attributes,
            rel_path: row.rel_path,
        })?;
        self.capacity.sub(old_size);
        self.capacity.add(receipt.size);

        Ok(StoredFile {
            file_id,
            storage_filename,
            storage_path,
            file_size: receipt.size,
            checksum_sha256: receipt.checksum_sha256,
            stored_at: Utc::now(),
        })
    }

    /// Client-facing delete, legal only where the mode permits it.
    pub async fn delete_file(&self, file_id: FileId) -> Result<(), StorageError> {
        self.mode.validate_operation(Operation::Delete)?;
        self.remove_internal(file_id, WalOperation::Delete).await
    }

    /// Deferred-GC delete. Only EDIT elements hold GC-able sources (expired
    /// temporaries, finalized originals, orphans), so any other mode refuses
    /// and no on-disk state changes.
    pub async fn gc_delete(&self, file_id: FileId) -> Result<(), StorageError> {
        let mode = self.mode.current();
        if mode != StorageMode::Edit {
            return Err(StorageError::ModeForbidden {
                mode,
                operation: Operation::Delete,
            });
        }
        self.remove_internal(file_id, WalOperation::GcDelete).await
    }

    /// Compensation path for a failed finalize: remove the just-written copy
    /// regardless of mode. The WAL records the aborted intent. Not reachable
    /// from any client-facing surface.
    pub async fn compensate_remove(&self, file_id: FileId) -> Result<(), StorageError> {
        let row = self.row(&file_id)?;
        self.backend.delete(&row.rel_path).await?;
        let _ = self.backend.delete(&sidecar_rel_path(&row.rel_path)).await;
        self.wal
            .append(&WalRecord {
                wal_id: uuid::Uuid::new_v4(),
                transaction_id: file_id,
                operation: WalOperation::Delete,
                status: crate::wal::WalStatus::Aborted,
                payload: serde_json::json!({ "file_id": file_id, "path": row.rel_path, "compensation": true }),
                created_at: Utc::now(),
            })
            .await?;
        self.catalog.remove(&file_id)?;
        self.capacity.sub(row.attributes.file_size);
        warn!(element = %self.config.element_id, %file_id, "compensated partial copy removed");
        Ok(())
    }

    async fn remove_internal(
        &self,
        file_id: FileId,
        operation: WalOperation,
    ) -> Result<(), StorageError> {
        let row = self.row(&file_id)?;
        self.backend.delete(&row.rel_path).await?;
        let _ = self.backend.delete(&sidecar_rel_path(&row.rel_path)).await;
        self.wal
            .append(&WalRecord::committed(
                file_id,
                operation,
                serde_json::json!({ "file_id": file_id, "path": row.rel_path }),
            ))
            .await?;
        self.catalog.remove(&file_id)?;
        self.capacity.sub(row.attributes.file_size);
        info!(element = %self.config.element_id, %file_id, ?operation, "file removed");
        Ok(())
    }

    /// Metadata lookup, legal in every mode.
    pub fn attributes(&self, file_id: FileId) -> Result<FileAttributes, StorageError> {
        self.mode.validate_operation(Operation::Metadata)?;
        Ok(self.row(&file_id)?.attributes)
    }

    /// Size and mtime of the data file, for ETag derivation.
    pub async fn file_stat(&self, file_id: FileId) -> Result<(CatalogRow, FileStat), StorageError> {
        self.mode.validate_operation(Operation::Metadata)?;
        let row = self.row(&file_id)?;
        let stat = self.backend.stat(&row.rel_path).await?;
        Ok((row, stat))
    }

    /// Open the file for streaming, optionally over an inclusive byte range.
    pub async fn open_read(
        &self,
        file_id: FileId,
        range: Option<(u64, u64)>,
    ) -> Result<(FileAttributes, ByteStream), StorageError> {
        self.mode.validate_operation(Operation::Read)?;
        let row = self.row(&file_id)?;
        let stream = self
            .backend
            .read_stream(&row.rel_path, range, DOWNLOAD_CHUNK_SIZE)
            .await?;
        Ok((row.attributes, stream))
    }

    /// Element-to-element copy source: attributes plus the full body.
    pub async fn copy_out(&self, file_id: FileId) -> Result<(FileAttributes, ByteStream), StorageError> {
        self.open_read(file_id, None).await
    }

    /// Re-read the checksum recorded in the on-disk sidecar, bypassing the
    /// catalog. The verify phase of finalization uses this as the source of
    /// truth rather than any cached copy.
    pub async fn sidecar_checksum(&self, file_id: FileId) -> Result<String, StorageError> {
        let row = self.row(&file_id)?;
        let raw = self.backend.read_all(&sidecar_rel_path(&row.rel_path)).await?;
        let attributes: FileAttributes = serde_json::from_slice(&raw)
            .map_err(|err| StorageError::Corrupt(format!("sidecar for {file_id}: {err}")))?;
        Ok(attributes.checksum_sha256)
    }

    /// File ids and creation times of every sidecar on disk, for the
    /// control plane's orphan scan.
    pub async fn sidecar_summaries(&self) -> Result<Vec<(FileId, DateTime<Utc>)>, StorageError> {
        let mut summaries = Vec::new();
        for path in self.backend.list_with_suffix(crate::sidecar::SIDECAR_SUFFIX).await? {
            let raw = self.backend.read_all(&path).await?;
            if let Ok(attributes) = serde_json::from_slice::<FileAttributes>(&raw) {
                summaries.push((attributes.file_id, attributes.created_at));
            }
        }
        Ok(summaries)
    }

    pub fn file_count(&self) -> u64 {
        self.catalog.len() as u64
    }

    pub fn capacity_report(&self) -> CapacityReport {
        CapacityReport {
            storage_id: self.config.element_id.clone(),
            mode: self.mode.current(),
            capacity: self.capacity.snapshot(),
            health: self.capacity.health(),
            last_update: Utc::now(),
            backend: self.config.storage_type,
            location: self.config.root.display().to_string(),
        }
    }

    pub fn info(&self) -> ElementInfo {
        let snapshot = self.capacity.snapshot();
        ElementInfo {
            name: self.config.element_id.clone(),
            display_name: self.config.display_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            mode: self.mode.current(),
            storage_type: self.config.storage_type,
            base_path: self.config.root.display().to_string(),
            capacity_bytes: snapshot.total,
            used_bytes: snapshot.used,
            file_count: self.file_count(),
            status: ElementStatus::Online,
            priority: self.config.priority,
            element_id: self.config.element_id.clone(),
        }
    }

    pub fn registration(&self) -> ElementRegistration {
        let snapshot = self.capacity.snapshot();
        ElementRegistration {
            element_id: self.config.element_id.clone(),
            api_url: self.config.api_url.clone(),
            mode: self.mode.current(),
            storage_type: self.config.storage_type,
            priority: self.config.priority,
            capacity_bytes: snapshot.total,
            used_bytes: snapshot.used,
            status: ElementStatus::Online,
            last_seen: Utc::now(),
        }
    }

    fn row(&self, file_id: &FileId) -> Result<CatalogRow, StorageError> {
        self.catalog.get(file_id)?.ok_or(StorageError::NotFound(*file_id))
    }

    async fn write_sidecar(
        &self,
        rel_path: &str,
        attributes: &FileAttributes,
    ) -> Result<(), StorageError> {
        let raw = serde_json::to_vec_pretty(attributes)?;
        self.backend
            .write_stream(
                &sidecar_rel_path(rel_path),
                bytes_stream(Bytes::from(raw)),
                WriteLimits::default(),
            )
            .await?;
        Ok(())
    }
}
