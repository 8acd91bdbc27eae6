//! Garbage collection worker.
//!
//! Two background duties:
//!
//! 1. **Queue scan** (every 6 h): process due cleanup entries, deleting the
//!    file on its element via the GC entry point, with exponential backoff
//!    (`2^retries * 1 h`) and a retry ceiling.
//! 2. **Orphan scan** (daily): sidecars older than the safety age with no
//!    row in the file registry are enqueued with `reason=orphaned`. Expired
//!    temporaries are enqueued as `ttl_expired` in the same pass.

use chrono::{Duration, Utc};
use filegrid_core::{CleanupEntry, CleanupReason, GcConfig};
use filegrid_storage::StorageError;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cleanup::CleanupQueue;
use crate::elements::ElementDirectory;
use crate::errors::AdminError;
use crate::files::FileRegistry;

pub struct GcWorker {
    queue: Arc<CleanupQueue>,
    directory: Arc<ElementDirectory>,
    files: Arc<FileRegistry>,
    config: GcConfig,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl GcWorker {
    pub fn new(
        queue: Arc<CleanupQueue>,
        directory: Arc<ElementDirectory>,
        files: Arc<FileRegistry>,
        config: GcConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            directory,
            files,
            config,
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let scan_period = std::time::Duration::from_secs(self.config.scan_interval_hours * 3600);
        let orphan_period =
            std::time::Duration::from_secs(self.config.orphan_scan_interval_hours * 3600);

        let worker = Arc::clone(self);
        let scan = tokio::spawn(async move {
            let mut interval = tokio::time::interval(scan_period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(err) = worker.run_scan_once().await {
                    warn!(error = %err, "cleanup queue scan failed");
                }
            }
        });

        let worker = Arc::clone(self);
        let orphan = tokio::spawn(async move {
            let mut interval = tokio::time::interval(orphan_period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(err) = worker.run_orphan_scan_once().await {
                    warn!(error = %err, "orphan scan failed");
                }
            }
        });

        let mut handles = self.handles.lock();
        handles.push(scan);
        handles.push(orphan);
    }

    pub fn stop(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }

    /// One pass over the due entries.
    pub async fn run_scan_once(&self) -> Result<usize, AdminError> {
        let due = self.queue.due(Utc::now())?;
        let mut processed = 0;
        for entry in due {
            self.process_entry(entry).await?;
            processed += 1;
        }
        Ok(processed)
    }

    async fn process_entry(&self, entry: CleanupEntry) -> Result<(), AdminError> {
        let outcome = match self.directory.get(&entry.storage_element_id) {
            Some(element) => match element.gc_delete(entry.file_id).await {
                Ok(()) => Ok(()),
                // Already gone: deletion is the desired end state.
                Err(StorageError::NotFound(_)) => Ok(()),
                Err(err) => Err(err.to_string()),
            },
            None => Err(format!(
                "storage element {} unavailable",
                entry.storage_element_id
            )),
        };

        match outcome {
            Ok(()) => {
                self.queue.mark_processed(&entry.entry_id, true, None)?;
                if entry.reason == CleanupReason::TtlExpired {
                    // The bytes are gone; retire the authoritative record so
                    // caches drop it too.
                    let _ = self.files.soft_delete(&entry.file_id);
                }
                info!(
                    entry_id = %entry.entry_id,
                    file_id = %entry.file_id,
                    element = %entry.storage_element_id,
                    reason = ?entry.reason,
                    "cleanup entry processed"
                );
            }
            Err(message) => {
                let retries = entry.retry_count + 1;
                if retries < self.config.max_retries {
                    let backoff = Duration::hours(1) * (1 << entry.retry_count);
                    self.queue.reschedule(
                        &entry.entry_id,
                        Utc::now() + backoff,
                        Some(message.clone()),
                    )?;
                    warn!(
                        entry_id = %entry.entry_id,
                        retries,
                        backoff_hours = backoff.num_hours(),
                        error = %message,
                        "cleanup entry rescheduled"
                    );
                } else {
                    self.queue
                        .mark_processed(&entry.entry_id, false, Some(message.clone()))?;
                    warn!(
                        entry_id = %entry.entry_id,
                        file_id = %entry.file_id,
                        error = %message,
                        "cleanup entry abandoned after retry ceiling"
                    );
                }
            }
        }
        Ok(())
    }

    /// One orphan pass: stale sidecars unknown to the registry, plus expired
    /// temporaries, are enqueued for deletion.
    pub async fn run_orphan_scan_once(&self) -> Result<usize, AdminError> {
        let mut enqueued = 0;
        let min_age = Duration::days(self.config.orphan_min_age_days);
        let cutoff = Utc::now() - min_age;

        for element in self.directory.list() {
            if element.current_mode() != filegrid_core::StorageMode::Edit {
                continue;
            }
            let summaries = element
                .sidecar_summaries()
                .await
                .map_err(|err| AdminError::Internal(anyhow::anyhow!(err)))?;
            for (file_id, created_at) in summaries {
                if created_at > cutoff {
                    continue;
                }
                if self.files.get(&file_id)?.is_some() {
                    continue;
                }
                if self.queue.has_pending_for(&file_id, element.element_id())? {
                    continue;
                }
                self.queue.enqueue(CleanupEntry::new(
                    file_id,
                    element.element_id(),
                    Utc::now(),
                    CleanupReason::Orphaned,
                ))?;
                enqueued += 1;
            }
        }

        for record in self.files.expired_temporaries()? {
            if self
                .queue
                .has_pending_for(&record.file_id, &record.storage_element_id)?
            {
                continue;
            }
            self.queue.enqueue(CleanupEntry::new(
                record.file_id,
                record.storage_element_id.clone(),
                Utc::now(),
                CleanupReason::TtlExpired,
            ))?;
            enqueued += 1;
        }

        if enqueued > 0 {
            info!(enqueued, "orphan scan enqueued cleanup entries");
        }
        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::EventPublisher;
    use bytes::Bytes;
    use filegrid_core::{ElementConfig, RetentionPolicy, StorageMode, StorageType};
    use filegrid_registry::EventBus;
    use filegrid_storage::{bytes_stream, StorageElement, StoreRequest};
    use uuid::Uuid;

    struct Fixture {
        _dir: tempfile::TempDir,
        queue: Arc<CleanupQueue>,
        files: Arc<FileRegistry>,
        directory: Arc<ElementDirectory>,
        element: Arc<StorageElement>,
        worker: Arc<GcWorker>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("admin")).unwrap();
        let bus = Arc::new(EventBus::new());
        let queue = Arc::new(CleanupQueue::open(&db).unwrap());
        let files = Arc::new(FileRegistry::open(&db, EventPublisher::new(bus)).unwrap());
        let directory = Arc::new(ElementDirectory::new());

        let element = StorageElement::open(
            ElementConfig {
                element_id: "se-edit".into(),
                display_name: "Edit".into(),
                api_url: "http://localhost:9001".into(),
                mode: StorageMode::Edit,
                storage_type: StorageType::Local,
                priority: 10,
                capacity_bytes: 1_000_000,
                root: dir.path().join("se-edit"),
                max_file_size: None,
            },
            1_000_000,
        )
        .await
        .unwrap();
        element.start().await.unwrap();
        directory.register(Arc::clone(&element));

        let worker = GcWorker::new(
            Arc::clone(&queue),
            Arc::clone(&directory),
            Arc::clone(&files),
            GcConfig::default(),
        );
        Fixture {
            _dir: dir,
            queue,
            files,
            directory,
            element,
            worker,
        }
    }

    async fn store_file(element: &StorageElement, file_id: Uuid) {
        element
            .store_file(
                StoreRequest {
                    file_id,
                    original_filename: "a.bin".into(),
                    content_type: "application/octet-stream".into(),
                    uploaded_by: "u".into(),
                    retention_policy: RetentionPolicy::Temporary,
                    ttl_expires_at: Some(Utc::now() + Duration::hours(1)),
                    description: None,
                    tags: vec![],
                    compressed: false,
                    compression_algorithm: None,
                    storage_filename: None,
                },
                bytes_stream(Bytes::from_static(b"gcdata")),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn due_entry_deletes_file_from_element() {
        let fx = fixture().await;
        let file_id = Uuid::new_v4();
        store_file(&fx.element, file_id).await;
        fx.queue
            .enqueue(CleanupEntry::new(
                file_id,
                "se-edit",
                Utc::now() - Duration::hours(1),
                CleanupReason::Finalized,
            ))
            .unwrap();

        let processed = fx.worker.run_scan_once().await.unwrap();
        assert_eq!(processed, 1);
        assert_eq!(fx.element.file_count(), 0);
        assert_eq!(fx.queue.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_file_counts_as_success() {
        let fx = fixture().await;
        fx.queue
            .enqueue(CleanupEntry::new(
                Uuid::new_v4(),
                "se-edit",
                Utc::now() - Duration::hours(1),
                CleanupReason::Orphaned,
            ))
            .unwrap();
        fx.worker.run_scan_once().await.unwrap();
        let entries = fx.queue.entries().unwrap();
        assert_eq!(entries[0].success, Some(true));
    }

    #[tokio::test]
    async fn unreachable_element_is_retried_with_backoff() {
        let fx = fixture().await;
        let entry = fx
            .queue
            .enqueue(CleanupEntry::new(
                Uuid::new_v4(),
                "se-missing",
                Utc::now() - Duration::hours(1),
                CleanupReason::Manual,
            ))
            .unwrap();

        fx.worker.run_scan_once().await.unwrap();
        let stored = fx.queue.get(&entry.entry_id).unwrap().unwrap();
        assert_eq!(stored.retry_count, 1);
        assert!(stored.processed_at.is_none());
        assert!(stored.scheduled_at > Utc::now());
    }

    #[tokio::test]
    async fn entry_is_abandoned_after_retry_ceiling() {
        let fx = fixture().await;
        let mut entry = CleanupEntry::new(
            Uuid::new_v4(),
            "se-missing",
            Utc::now() - Duration::hours(1),
            CleanupReason::Manual,
        );
        entry.retry_count = 4; // next failure is the fifth attempt
        let entry = fx.queue.enqueue(entry).unwrap();

        fx.worker.run_scan_once().await.unwrap();
        let stored = fx.queue.get(&entry.entry_id).unwrap().unwrap();
        assert_eq!(stored.success, Some(false));
        assert!(stored.processed_at.is_some());
        assert!(stored.error_message.is_some());
    }

    #[tokio::test]
    async fn orphan_scan_enqueues_stale_unregistered_sidecars() {
        let fx = fixture().await;
        let orphan_id = Uuid::new_v4();
        store_file(&fx.element, orphan_id).await;
        // Nothing is old enough yet.
        assert_eq!(fx.worker.run_orphan_scan_once().await.unwrap(), 0);

        // Rebuild the worker with a zero minimum age so the sidecar
        // qualifies immediately.
        let worker = GcWorker::new(
            Arc::clone(&fx.queue),
            Arc::clone(&fx.directory),
            Arc::clone(&fx.files),
            GcConfig {
                orphan_min_age_days: 0,
                ..GcConfig::default()
            },
        );
        let enqueued = worker.run_orphan_scan_once().await.unwrap();
        assert_eq!(enqueued, 1);
        assert!(fx.queue.has_pending_for(&orphan_id, "se-edit").unwrap());
        // A second scan does not enqueue a duplicate.
        assert_eq!(worker.run_orphan_scan_once().await.unwrap(), 0);
    }
}
