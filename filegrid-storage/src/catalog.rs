//! Metadata catalog derived from attribute sidecars.
//!
//! The catalog is a sled tree keyed by file id, giving O(log n) lookup
//! without touching the data directory. It is a cache: `reconcile` rebuilds
//! every row from the sidecars on disk, which repairs crashes that landed
//! between a sidecar write and the corresponding catalog update.

use filegrid_core::FileId;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::StorageBackend;
use crate::errors::StorageError;
use crate::sidecar::{FileAttributes, SIDECAR_SUFFIX};

/// One catalog row: the sidecar contents plus where the data file lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRow {
    pub attributes: FileAttributes,
    /// Data file path relative to the element root.
    pub rel_path: String,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Catalog rows rebuilt from sidecars.
    pub restored: usize,
    /// Data files with no sidecar; candidates for the orphan scan.
    pub orphan_data_files: Vec<String>,
}

pub struct MetadataCatalog {
    tree: sled::Tree,
}

impl MetadataCatalog {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            tree: db.open_tree("catalog")?,
        })
    }

    pub fn upsert(&self, row: &CatalogRow) -> Result<(), StorageError> {
        let key = row.attributes.file_id.as_bytes();
        self.tree.insert(key, serde_json::to_vec(row)?)?;
        Ok(())
    }

    pub fn get(&self, file_id: &FileId) -> Result<Option<CatalogRow>, StorageError> {
        match self.tree.get(file_id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, file_id: &FileId) -> Result<(), StorageError> {
        self.tree.remove(file_id.as_bytes())?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn rows(&self) -> Result<Vec<CatalogRow>, StorageError> {
        let mut rows = Vec::with_capacity(self.tree.len());
        for item in self.tree.iter() {
            let (_, raw) = item?;
            match serde_json::from_slice(&raw) {
                Ok(row) => rows.push(row),
                Err(err) => warn!(error = %err, "skipping unreadable catalog row"),
            }
        }
        Ok(rows)
    }

    pub fn total_used_bytes(&self) -> Result<u64, StorageError> {
        Ok(self
            .rows()?
            .iter()
            .map(|row| row.attributes.file_size)
            .sum())
    }

    /// Rebuild every row from the sidecars on disk and report data files
    /// that have no sidecar.
    pub async fn reconcile(
        &self,
        backend: &dyn StorageBackend,
    ) -> Result<ReconcileReport, StorageError> {
        let mut report = ReconcileReport::default();

        self.tree.clear()?;
        let sidecars = backend.list_with_suffix(SIDECAR_SUFFIX).await?;
        let mut known_data_paths = std::collections::HashSet::new();
        for sidecar_path in &sidecars {
            let raw = backend.read_all(sidecar_path).await?;
            let attributes: FileAttributes = match serde_json::from_slice(&raw) {
                Ok(attributes) => attributes,
                Err(err) => {
                    warn!(path = %sidecar_path, error = %err, "unreadable sidecar skipped");
                    continue;
                }
            };
            let rel_path = sidecar_path
                .strip_suffix(SIDECAR_SUFFIX)
                .unwrap_or(sidecar_path)
                .to_string();
            known_data_paths.insert(rel_path.clone());
            self.upsert(&CatalogRow {
                attributes,
                rel_path,
            })?;
            report.restored += 1;
        }

        // Anything in the object space that is neither a sidecar nor a data
        // file with a sidecar is an orphan left by a crash mid-upload.
        for candidate in backend.list_with_suffix("").await? {
            if candidate.ends_with(SIDECAR_SUFFIX) || known_data_paths.contains(&candidate) {
                continue;
            }
            report.orphan_data_files.push(candidate);
        }

        info!(
            restored = report.restored,
            orphans = report.orphan_data_files.len(),
            "catalog reconciled from sidecars"
        );
        Ok(report)
    }
}
