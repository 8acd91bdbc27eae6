//! Error types for the control plane.

use filegrid_core::FileId;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("file {0} not found")]
    FileNotFound(FileId),

    #[error("file {0} already registered")]
    FileExists(FileId),

    #[error("file {0} is not temporary")]
    NotTemporary(FileId),

    #[error("file {0} is already finalized")]
    AlreadyFinalized(FileId),

    #[error("file {0} has been deleted")]
    FileDeleted(FileId),

    #[error("temporary file must carry a ttl")]
    MissingTtl,

    #[error("finalize transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error("finalize transaction {0} is terminal and cannot change")]
    TransactionTerminal(Uuid),

    #[error("storage element {0} is not registered")]
    ElementNotFound(String),

    #[error("store error: {0}")]
    Db(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
