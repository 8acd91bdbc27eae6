//! # Filegrid Storage Element
//!
//! A single-node file persistence service. Each element owns a filesystem
//! subtree laid out as `YYYY/MM/DD/HH/{storage_filename}`, an attribute
//! sidecar next to every data file (the authoritative per-file metadata), an
//! append-only write-ahead log, and a sled-backed metadata catalog derived
//! from the sidecars. The element's mode state machine decides which
//! operations are legal at any moment.
//!
//! Crash recovery leans on the sidecars: a failure between the sidecar write
//! and the catalog update is repaired by `reconcile`, which rebuilds catalog
//! rows from the sidecars on disk. A data file without a sidecar is an
//! orphan, reported for the control plane's orphan scan to pick up.

mod backend;
mod capacity;
mod catalog;
mod errors;
mod mode;
mod naming;
mod sidecar;
mod store;
mod wal;

pub use backend::{
    bytes_stream, ByteStream, FileStat, LocalBackend, StorageBackend, WriteLimits, WriteReceipt,
};
pub use capacity::{CapacityCalculator, CapacityReport, CapacitySnapshot};
pub use catalog::{CatalogRow, MetadataCatalog, ReconcileReport};
pub use errors::StorageError;
pub use mode::{ModeStateMachine, ModeTransition};
pub use naming::{
    generate_storage_filename, parse_storage_filename, sanitize_filename, storage_prefix,
    ParsedStorageFilename,
};
pub use sidecar::{sidecar_rel_path, FileAttributes, SIDECAR_SUFFIX};
pub use store::{ElementInfo, StorageElement, StoreRequest, StoredFile};
pub use wal::{WalOperation, WalRecord, WalStatus, WriteAheadLog};
