//! Event publication for the admin service.
//!
//! A thin layer over the bus that exists for one reason: events must be
//! emitted after (and only after) the owning store mutation commits, inside
//! the same critical section, so per-file events reach subscribers in commit
//! order. The file registry calls these while holding its commit lock.

use filegrid_core::{FileEvent, FileId, FileRecord};
use filegrid_registry::EventBus;
use std::sync::Arc;

#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<EventBus>,
}

impl EventPublisher {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    pub fn file_created(&self, record: &FileRecord) {
        self.bus.publish(FileEvent::created(record.clone()));
    }

    pub fn file_updated(&self, record: &FileRecord) {
        self.bus.publish(FileEvent::updated(record.clone()));
    }

    pub fn file_deleted(&self, file_id: FileId, storage_element_id: &str) {
        self.bus.publish(FileEvent::deleted(file_id, storage_element_id));
    }
}
