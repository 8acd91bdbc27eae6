//! Multi-level file metadata cache.
//!
//! Lookup order: in-process LRU (TTL 300 s, 1 000 entries) → shared
//! registry record (TTL 1 800 s) → authoritative file registry. Misses
//! back-fill the levels above so the next lookup is cheap.

use chrono::{DateTime, Duration, Utc};
use filegrid_core::{FileId, FileRecord, QueryConfig};
use filegrid_admin::FileRegistry;
use filegrid_registry::{file_metadata_key, RegistryStore};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, warn};

struct CacheEntry {
    record: FileRecord,
    expires_at: DateTime<Utc>,
}

pub struct MetadataCache {
    lru: Mutex<LruCache<FileId, CacheEntry>>,
    registry: Arc<RegistryStore>,
    files: Arc<FileRegistry>,
    config: QueryConfig,
}

impl MetadataCache {
    pub fn new(registry: Arc<RegistryStore>, files: Arc<FileRegistry>, config: QueryConfig) -> Self {
        let capacity = NonZeroUsize::new(config.lru_capacity.max(1)).expect("capacity is nonzero");
        Self {
            lru: Mutex::new(LruCache::new(capacity)),
            registry,
            files,
            config,
        }
    }

    /// Resolve file metadata through the cache chain. Deleted files resolve
    /// to None at every level.
    pub fn get(&self, file_id: &FileId) -> Option<FileRecord> {
        let now = Utc::now();
        {
            let mut lru = self.lru.lock();
            match lru.get(file_id) {
                Some(entry) if entry.expires_at > now => {
                    debug!(%file_id, "metadata cache hit (lru)");
                    return Some(entry.record.clone());
                }
                Some(_) => {
                    lru.pop(file_id);
                }
                None => {}
            }
        }

        if let Some(record) = self
            .registry
            .get_json::<FileRecord>(&file_metadata_key(file_id))
        {
            debug!(%file_id, "metadata cache hit (registry)");
            self.fill_lru(record.clone());
            return Some(record);
        }

        match self.files.get(file_id) {
            Ok(Some(record)) if !record.is_deleted() => {
                debug!(%file_id, "metadata served from authoritative registry");
                self.fill_registry(&record);
                self.fill_lru(record.clone());
                Some(record)
            }
            Ok(_) => None,
            Err(err) => {
                warn!(%file_id, error = %err, "authoritative metadata lookup failed");
                None
            }
        }
    }

    /// Drop the file from both cache levels (on delete events).
    pub fn invalidate(&self, file_id: &FileId) {
        self.lru.lock().pop(file_id);
        self.registry.invalidate(&file_metadata_key(file_id));
    }

    fn fill_lru(&self, record: FileRecord) {
        let entry = CacheEntry {
            expires_at: Utc::now() + Duration::seconds(self.config.lru_ttl_secs),
            record,
        };
        self.lru.lock().put(entry.record.file_id, entry);
    }

    fn fill_registry(&self, record: &FileRecord) {
        let ttl = Duration::seconds(self.config.registry_ttl_secs as i64);
        if let Err(err) =
            self.registry
                .put_json(&file_metadata_key(&record.file_id), record, Some(ttl))
        {
            warn!(file_id = %record.file_id, error = %err, "failed to back-fill registry cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filegrid_core::RetentionPolicy;
    use filegrid_admin::EventPublisher;
    use filegrid_registry::EventBus;
    use uuid::Uuid;

    fn fixture() -> (tempfile::TempDir, Arc<FileRegistry>, Arc<RegistryStore>, MetadataCache) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("admin")).unwrap();
        let bus = Arc::new(EventBus::new());
        let files = Arc::new(FileRegistry::open(&db, EventPublisher::new(bus)).unwrap());
        let registry = Arc::new(RegistryStore::new());
        let cache = MetadataCache::new(
            Arc::clone(&registry),
            Arc::clone(&files),
            QueryConfig::default(),
        );
        (dir, files, registry, cache)
    }

    fn record(file_id: Uuid) -> FileRecord {
        FileRecord {
            file_id,
            original_filename: "cached.bin".into(),
            storage_filename: "cached_u_20260101T000000_x.bin".into(),
            file_size: 9,
            checksum_sha256: "cc".into(),
            content_type: "application/octet-stream".into(),
            retention_policy: RetentionPolicy::Temporary,
            ttl_expires_at: Some(Utc::now() + Duration::hours(1)),
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

    #[test]
    fn miss_falls_through_and_backfills() {
        let (_dir, files, registry, cache) = fixture();
        let file_id = Uuid::new_v4();
        files.register(record(file_id)).unwrap();

        // First lookup reaches the authoritative store and back-fills.
        assert!(cache.get(&file_id).is_some());
        assert!(registry
            .get_json::<FileRecord>(&file_metadata_key(&file_id))
            .is_some());
        // Second lookup is served from cache even if the store row vanishes.
        files.soft_delete(&file_id).unwrap();
        assert!(cache.get(&file_id).is_some());
    }

    #[test]
    fn invalidate_clears_both_levels() {
        let (_dir, files, registry, cache) = fixture();
        let file_id = Uuid::new_v4();
        files.register(record(file_id)).unwrap();
        cache.get(&file_id).unwrap();

        cache.invalidate(&file_id);
        assert!(registry
            .get_json::<FileRecord>(&file_metadata_key(&file_id))
            .is_none());
        // The next lookup falls through to the (still live) store.
        assert!(cache.get(&file_id).is_some());
    }

    #[test]
    fn unknown_and_deleted_files_resolve_to_none() {
        let (_dir, files, _registry, cache) = fixture();
        assert!(cache.get(&Uuid::new_v4()).is_none());

        let file_id = Uuid::new_v4();
        files.register(record(file_id)).unwrap();
        files.soft_delete(&file_id).unwrap();
        assert!(cache.get(&file_id).is_none());
    }
}
