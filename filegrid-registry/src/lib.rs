//! # Filegrid Shared Registry
//!
//! The coordination fabric shared by every filegrid service: TTL'd capacity
//! records with sorted indices for the selector, distributed locks with lease
//! semantics for the rotation job and the capacity-monitor leader, and the
//! pub/sub event bus carrying file lifecycle events from the admin service to
//! the query service.
//!
//! The registry behaves like an external store even though it runs in
//! process: records expire, lock leases lapse when not renewed, and
//! subscribers can lag or drop. Callers are written against those semantics
//! so the implementation can be swapped for a networked backend without
//! touching them.

mod events;
mod lock;
mod store;

pub use events::{EventBus, EventStream};
pub use lock::{LeaderLease, LockRegistry, LockToken};
pub use store::{RegistryStore, ScoredMember};

/// Sorted index consulted by the selector for permanent-file placement.
pub const INDEX_CAPACITY_RW: &str = "capacity:rw:available";
/// Sorted index consulted by the selector for temporary-file placement.
pub const INDEX_CAPACITY_EDIT: &str = "capacity:edit:available";

/// Key of the capacity record for a given element.
pub fn capacity_key(element_id: &str) -> String {
    format!("capacity:element:{element_id}")
}

/// Key of the query service's shared metadata cache entry for a file.
pub fn file_metadata_key(file_id: &uuid::Uuid) -> String {
    format!("filemeta:{file_id}")
}
