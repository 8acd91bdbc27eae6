//! File lifecycle event payloads.
//!
//! Events are published by the admin service after the owning state change
//! commits and consumed by the query service's cache sync. The payload is a
//! full metadata snapshot so subscribers never need a follow-up fetch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{FileId, FileRecord};

/// Event channel names, one per lifecycle transition.
pub const CHANNEL_FILE_CREATED: &str = "file:created";
pub const CHANNEL_FILE_UPDATED: &str = "file:updated";
pub const CHANNEL_FILE_DELETED: &str = "file:deleted";

/// Kind of file lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    pub fn channel(&self) -> &'static str {
        match self {
            EventKind::Created => CHANNEL_FILE_CREATED,
            EventKind::Updated => CHANNEL_FILE_UPDATED,
            EventKind::Deleted => CHANNEL_FILE_DELETED,
        }
    }
}

/// A file lifecycle event with its metadata snapshot.
///
/// Delivery is at-least-once; consumers must apply events idempotently.
/// `metadata` is present for create/update and absent for delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEvent {
    pub event_type: EventKind,
    pub file_id: FileId,
    pub storage_element_id: String,
    pub metadata: Option<FileRecord>,
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    pub fn created(record: FileRecord) -> Self {
        Self {
            event_type: EventKind::Created,
            file_id: record.file_id,
            storage_element_id: record.storage_element_id.clone(),
            timestamp: Utc::now(),
            metadata: Some(record),
        }
    }

    pub fn updated(record: FileRecord) -> Self {
        Self {
            event_type: EventKind::Updated,
            file_id: record.file_id,
            storage_element_id: record.storage_element_id.clone(),
            timestamp: Utc::now(),
            metadata: Some(record),
        }
    }

    pub fn deleted(file_id: FileId, storage_element_id: impl Into<String>) -> Self {
        Self {
            event_type: EventKind::Deleted,
            file_id,
            storage_element_id: storage_element_id.into(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names() {
        assert_eq!(EventKind::Created.channel(), "file:created");
        assert_eq!(EventKind::Updated.channel(), "file:updated");
        assert_eq!(EventKind::Deleted.channel(), "file:deleted");
    }
}
