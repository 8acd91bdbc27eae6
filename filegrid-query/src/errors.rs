//! Error types for the query service.

use filegrid_core::{FileId, StorageMode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("file {0} not found")]
    FileNotFound(FileId),

    #[error("storage element mode {0} does not permit reads")]
    ModeForbidden(StorageMode),

    /// The Range header was malformed or no requested range fits the file.
    #[error("range not satisfiable for {total} bytes")]
    RangeNotSatisfiable { total: u64 },

    #[error("storage element {0} unavailable")]
    ElementUnavailable(String),

    #[error(transparent)]
    Storage(#[from] filegrid_storage::StorageError),

    #[error(transparent)]
    Admin(#[from] filegrid_admin::AdminError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
