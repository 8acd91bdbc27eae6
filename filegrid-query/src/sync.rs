//! Cache synchronization from lifecycle events.
//!
//! Subscribes to the three event channels and applies each message to the
//! search index. Every application is idempotent — replaying a message
//! yields the same index state — and the subscriber reconnects with
//! exponential backoff (capped at 30 s) when its stream closes. Messages
//! missed during downtime are not replayed; the operator-triggered
//! `rebuild` repopulates the index from the authoritative registry.

use filegrid_core::{EventKind, FileEvent, QueryConfig};
use filegrid_admin::FileRegistry;
use filegrid_registry::EventBus;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::QueryError;
use crate::index::SearchIndex;

pub struct CacheSyncService {
    bus: Arc<EventBus>,
    index: Arc<SearchIndex>,
    files: Arc<FileRegistry>,
    config: QueryConfig,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CacheSyncService {
    pub fn new(
        bus: Arc<EventBus>,
        index: Arc<SearchIndex>,
        files: Arc<FileRegistry>,
        config: QueryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            index,
            files,
            config,
            handle: Mutex::new(None),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let bus = Arc::clone(&self.bus);
        let index = Arc::clone(&self.index);
        let max_backoff = std::time::Duration::from_secs(self.config.reconnect_max_backoff_secs);
        let task = tokio::spawn(async move {
            let mut backoff = std::time::Duration::from_secs(1);
            loop {
                let mut stream = bus.subscribe_all();
                info!("cache sync subscribed to lifecycle channels");
                while let Some(event) = stream.next().await {
                    // A delivered event proves the connection is healthy.
                    backoff = std::time::Duration::from_secs(1);
                    Self::apply(&index, event);
                }
                warn!(
                    retry_in_secs = backoff.as_secs(),
                    "event stream closed; reconnecting"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(max_backoff);
            }
        });
        *self.handle.lock() = Some(task);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    /// Apply one event to the index. Safe to call repeatedly with the same
    /// event.
    pub fn apply(index: &SearchIndex, event: FileEvent) {
        let file_id = event.file_id;
        match event.event_type {
            EventKind::Created => {
                if let Some(record) = event.metadata {
                    index.upsert(record);
                    debug!(%file_id, "cache synced for file:created");
                }
            }
            EventKind::Updated => {
                if let Some(record) = event.metadata {
                    // Missing rows fall through to insert: the recovery path
                    // for updates that outran their create.
                    index.update_or_insert(record);
                    debug!(%file_id, "cache synced for file:updated");
                }
            }
            EventKind::Deleted => {
                index.remove(&file_id);
                debug!(%file_id, "cache synced for file:deleted");
            }
        }
    }

    /// Operator-triggered full rebuild from the authoritative registry.
    pub fn rebuild(&self) -> Result<usize, QueryError> {
        let records = self.files.list_live()?;
        let count = records.len();
        self.index.rebuild(records);
        Ok(count)
    }
}
