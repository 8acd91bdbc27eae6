//! Authoritative file registry.
//!
//! The single source of truth for file identity and placement. Every
//! mutation commits to sled first and publishes its lifecycle event before
//! releasing the commit lock, which is what gives subscribers per-file
//! commit ordering.

use chrono::Utc;
use filegrid_core::{FileId, FileRecord, RetentionPolicy};
use parking_lot::Mutex;
use tracing::info;

use crate::errors::AdminError;
use crate::publisher::EventPublisher;

pub struct FileRegistry {
    tree: sled::Tree,
    publisher: EventPublisher,
    commit_lock: Mutex<()>,
}

impl FileRegistry {
    pub fn open(db: &sled::Db, publisher: EventPublisher) -> Result<Self, AdminError> {
        Ok(Self {
            tree: db.open_tree("files")?,
            publisher,
            commit_lock: Mutex::new(()),
        })
    }

    /// Register a freshly uploaded file and publish `file:created`.
    pub fn register(&self, record: FileRecord) -> Result<FileRecord, AdminError> {
        if record.retention_policy == RetentionPolicy::Temporary && record.ttl_expires_at.is_none() {
            return Err(AdminError::MissingTtl);
        }
        let guard = self.commit_lock.lock();
        if self.tree.contains_key(record.file_id.as_bytes())? {
            return Err(AdminError::FileExists(record.file_id));
        }
        self.put(&record)?;
        self.publisher.file_created(&record);
        drop(guard);
        info!(file_id = %record.file_id, element = %record.storage_element_id, "file registered");
        Ok(record)
    }

    pub fn get(&self, file_id: &FileId) -> Result<Option<FileRecord>, AdminError> {
        match self.tree.get(file_id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn require(&self, file_id: &FileId) -> Result<FileRecord, AdminError> {
        self.get(file_id)?.ok_or(AdminError::FileNotFound(*file_id))
    }

    /// Commit the finalize outcome: the file becomes permanent, points at
    /// the target element, and `file:updated` goes out in the same section.
    pub fn mark_finalized(
        &self,
        file_id: &FileId,
        target_element_id: &str,
        storage_path: &str,
    ) -> Result<FileRecord, AdminError> {
        let guard = self.commit_lock.lock();
        let mut record = self.require(file_id)?;
        if record.is_deleted() {
            return Err(AdminError::FileDeleted(*file_id));
        }
        let now = Utc::now();
        record.retention_policy = RetentionPolicy::Permanent;
        record.ttl_expires_at = None;
        record.finalized_at = Some(now);
        record.storage_element_id = target_element_id.to_string();
        record.storage_path = storage_path.to_string();
        record.updated_at = now;
        self.put(&record)?;
        self.publisher.file_updated(&record);
        drop(guard);
        info!(%file_id, target = target_element_id, "file finalized");
        Ok(record)
    }

    /// General metadata update with `file:updated`.
    pub fn update(&self, mut record: FileRecord) -> Result<FileRecord, AdminError> {
        let guard = self.commit_lock.lock();
        if !self.tree.contains_key(record.file_id.as_bytes())? {
            return Err(AdminError::FileNotFound(record.file_id));
        }
        record.updated_at = Utc::now();
        self.put(&record)?;
        self.publisher.file_updated(&record);
        drop(guard);
        Ok(record)
    }

    /// Soft delete: the row survives with `deleted_at` set, and
    /// `file:deleted` tells caches to drop it.
    pub fn soft_delete(&self, file_id: &FileId) -> Result<FileRecord, AdminError> {
        let guard = self.commit_lock.lock();
        let mut record = self.require(file_id)?;
        if record.deleted_at.is_none() {
            let now = Utc::now();
            record.deleted_at = Some(now);
            record.updated_at = now;
            self.put(&record)?;
            self.publisher.file_deleted(*file_id, &record.storage_element_id);
        }
        drop(guard);
        Ok(record)
    }

    /// Every live (non-deleted) record; the query rebuild path.
    pub fn list_live(&self) -> Result<Vec<FileRecord>, AdminError> {
        let mut records = Vec::new();
        for item in self.tree.iter() {
            let (_, raw) = item?;
            let record: FileRecord = serde_json::from_slice(&raw)?;
            if !record.is_deleted() {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Temporary, unfinalized, undeleted files whose TTL has lapsed.
    pub fn expired_temporaries(&self) -> Result<Vec<FileRecord>, AdminError> {
        let now = Utc::now();
        Ok(self
            .list_live()?
            .into_iter()
            .filter(|record| {
                record.retention_policy == RetentionPolicy::Temporary
                    && record.finalized_at.is_none()
                    && matches!(record.ttl_expires_at, Some(ttl) if ttl <= now)
            })
            .collect())
    }

    pub fn count(&self) -> usize {
        self.tree.len()
    }

    /// Cheap store reachability probe for the health aggregator.
    pub fn ping(&self) -> bool {
        self.tree.contains_key(b"__ping__").is_ok()
    }

    fn put(&self, record: &FileRecord) -> Result<(), AdminError> {
        self.tree
            .insert(record.file_id.as_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filegrid_core::EventKind;
    use filegrid_registry::EventBus;
    use std::sync::Arc;
    use uuid::Uuid;

    fn registry() -> (tempfile::TempDir, Arc<EventBus>, FileRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("admin")).unwrap();
        let bus = Arc::new(EventBus::new());
        let registry = FileRegistry::open(&db, EventPublisher::new(Arc::clone(&bus))).unwrap();
        (dir, bus, registry)
    }

    fn record(file_id: Uuid, retention: RetentionPolicy) -> FileRecord {
        FileRecord {
            file_id,
            original_filename: "doc.txt".into(),
            storage_filename: "doc_u_20260101T000000_x.txt".into(),
            file_size: 5,
            checksum_sha256: "aa".into(),
            content_type: "text/plain".into(),
            retention_policy: retention,
            ttl_expires_at: match retention {
                RetentionPolicy::Temporary => Some(Utc::now() + chrono::Duration::hours(1)),
                RetentionPolicy::Permanent => None,
            },
            finalized_at: None,
            storage_element_id: "se-edit".into(),
            storage_path: "2026/01/01/00".into(),
            uploaded_by: "u".into(),
            description: None,
            tags: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn register_publishes_created_after_commit() {
        let (_dir, bus, registry) = registry();
        let mut stream = bus.subscribe_all();
        let file_id = Uuid::new_v4();
        registry.register(record(file_id, RetentionPolicy::Temporary)).unwrap();

        let event = stream.next().await.unwrap();
        assert_eq!(event.event_type, EventKind::Created);
        assert_eq!(event.file_id, file_id);
        // The row was committed before the event went out.
        assert!(registry.get(&file_id).unwrap().is_some());
    }

    #[test]
    fn temporary_without_ttl_is_rejected() {
        let (_dir, _bus, registry) = registry();
        let mut bad = record(Uuid::new_v4(), RetentionPolicy::Temporary);
        bad.ttl_expires_at = None;
        assert!(matches!(registry.register(bad), Err(AdminError::MissingTtl)));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let (_dir, _bus, registry) = registry();
        let file_id = Uuid::new_v4();
        registry.register(record(file_id, RetentionPolicy::Temporary)).unwrap();
        assert!(matches!(
            registry.register(record(file_id, RetentionPolicy::Temporary)),
            Err(AdminError::FileExists(_))
        ));
    }

    #[tokio::test]
    async fn mark_finalized_promotes_and_publishes_updated() {
        let (_dir, bus, registry) = registry();
        let file_id = Uuid::new_v4();
        registry.register(record(file_id, RetentionPolicy::Temporary)).unwrap();
        let mut stream = bus.subscribe_all();

        let updated = registry.mark_finalized(&file_id, "se-rw", "2026/02/02/02").unwrap();
        assert_eq!(updated.retention_policy, RetentionPolicy::Permanent);
        assert!(updated.finalized_at.is_some());
        assert!(updated.ttl_expires_at.is_none());
        assert_eq!(updated.storage_element_id, "se-rw");

        let event = stream.next().await.unwrap();
        assert_eq!(event.event_type, EventKind::Updated);
        assert_eq!(event.metadata.unwrap().storage_element_id, "se-rw");
    }

    #[tokio::test]
    async fn soft_delete_is_idempotent_and_publishes_once() {
        let (_dir, bus, registry) = registry();
        let file_id = Uuid::new_v4();
        registry.register(record(file_id, RetentionPolicy::Temporary)).unwrap();
        let mut stream = bus.subscribe_all();

        registry.soft_delete(&file_id).unwrap();
        let again = registry.soft_delete(&file_id).unwrap();
        assert!(again.deleted_at.is_some());

        let event = stream.next().await.unwrap();
        assert_eq!(event.event_type, EventKind::Deleted);
        // Exactly one delete event: nothing further is pending.
        assert!(registry.list_live().unwrap().is_empty());
    }

    #[test]
    fn expired_temporaries_are_found() {
        let (_dir, _bus, registry) = registry();
        let expired_id = Uuid::new_v4();
        let mut expired = record(expired_id, RetentionPolicy::Temporary);
        expired.ttl_expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        registry.register(expired).unwrap();
        registry.register(record(Uuid::new_v4(), RetentionPolicy::Temporary)).unwrap();

        let found = registry.expired_temporaries().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file_id, expired_id);
    }
}
