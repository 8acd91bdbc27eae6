//! Error types for the ingest path.

use thiserror::Error;
use uuid::Uuid;

use filegrid_admin::AdminError;
use filegrid_storage::StorageError;

#[derive(Error, Debug)]
pub enum IngestError {
    /// No storage element can take the file right now (surfaced as 503).
    #[error("no available storage element")]
    NoAvailableStorage,

    #[error("file of {size} bytes exceeds maximum of {max}")]
    FileTooLarge { size: u64, max: u64 },

    #[error("storage element {0} unavailable")]
    ElementUnavailable(String),

    /// Copy landed but its bytes do not match the recorded checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("finalize transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Admin(#[from] AdminError),

    #[error("compression failure: {0}")]
    Compression(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IngestError {
    /// Whether a finalize phase hitting this error should retry. Checksum
    /// mismatches never retry; they force rollback.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Storage(err) => err.is_transient(),
            IngestError::ElementUnavailable(_) => true,
            IngestError::Admin(AdminError::Db(_)) => true,
            _ => false,
        }
    }
}
