//! # Filegrid Ingester
//!
//! The write path of the platform: pick a storage element for each upload
//! (capacity- and priority-aware, with layered fallbacks), stream the body
//! to it, register the file with the control plane, and later promote
//! temporary files to permanent storage through the two-phase finalize
//! protocol.

mod compression;
mod errors;
mod finalize;
mod selector;
mod upload;

pub use compression::{compress, decompress};
pub use errors::IngestError;
pub use finalize::FinalizeCoordinator;
pub use selector::StorageSelector;
pub use upload::{UploadReceipt, UploadRequest, UploadService};
