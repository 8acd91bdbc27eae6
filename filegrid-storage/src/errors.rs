//! Error types for storage element operations.

use filegrid_core::{FileId, Operation, StorageMode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// The element's current mode does not permit the operation.
    #[error("operation {operation:?} not allowed in {mode} mode")]
    ModeForbidden {
        mode: StorageMode,
        operation: Operation,
    },

    /// Illegal mode transition.
    #[error("cannot transition from {from} to {to}")]
    InvalidTransition { from: StorageMode, to: StorageMode },

    /// The element cannot hold the incoming file (surfaced as HTTP 507).
    #[error("insufficient space: {needed} bytes needed, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },

    /// Body exceeded the configured upload ceiling.
    #[error("file of {size} bytes exceeds maximum of {max}")]
    FileTooLarge { size: u64, max: u64 },

    #[error("file {0} not found on this element")]
    NotFound(FileId),

    /// Resolved path escaped the element root.
    #[error("path escapes storage root: {0}")]
    PathTraversal(String),

    /// Sidecar or WAL contents could not be interpreted.
    #[error("corrupt element state: {0}")]
    Corrupt(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("catalog error: {0}")]
    Catalog(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StorageError {
    /// Transient failures are worth retrying; logical failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Io(_) | StorageError::Catalog(_))
    }
}
