//! Storage element directory.
//!
//! Maps element ids to live element handles. This is the admin-side lookup
//! the selector falls back to when the shared registry is stale, and the
//! resolution step for finalize copies and GC deletes.

use dashmap::DashMap;
use filegrid_core::ElementRegistration;
use filegrid_storage::StorageElement;
use std::sync::Arc;
use tracing::info;

use crate::errors::AdminError;

#[derive(Default)]
pub struct ElementDirectory {
    entries: DashMap<String, Arc<StorageElement>>,
}

impl ElementDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, element: Arc<StorageElement>) {
        info!(element = element.element_id(), mode = %element.current_mode(), "storage element registered");
        self.entries.insert(element.element_id().to_string(), element);
    }

    pub fn get(&self, element_id: &str) -> Option<Arc<StorageElement>> {
        self.entries.get(element_id).map(|entry| Arc::clone(&entry))
    }

    pub fn require(&self, element_id: &str) -> Result<Arc<StorageElement>, AdminError> {
        self.get(element_id)
            .ok_or_else(|| AdminError::ElementNotFound(element_id.to_string()))
    }

    pub fn registration(&self, element_id: &str) -> Option<ElementRegistration> {
        self.get(element_id).map(|element| element.registration())
    }

    pub fn list(&self) -> Vec<Arc<StorageElement>> {
        self.entries.iter().map(|entry| Arc::clone(&entry)).collect()
    }

    pub fn registrations(&self) -> Vec<ElementRegistration> {
        self.list().iter().map(|element| element.registration()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
