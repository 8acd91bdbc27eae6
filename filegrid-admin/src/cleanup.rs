//! Deferred-deletion queue.
//!
//! Entries are scheduled (finalized sources get the 24 h safety margin),
//! scanned by the GC worker, and retried with exponential backoff until a
//! retry ceiling marks them terminally failed.

use chrono::{DateTime, Utc};
use filegrid_core::{CleanupEntry, CleanupReason, FileId};
use tracing::debug;
use uuid::Uuid;

use crate::errors::AdminError;

pub struct CleanupQueue {
    tree: sled::Tree,
}

impl CleanupQueue {
    pub fn open(db: &sled::Db) -> Result<Self, AdminError> {
        Ok(Self {
            tree: db.open_tree("cleanup_queue")?,
        })
    }

    pub fn enqueue(&self, entry: CleanupEntry) -> Result<CleanupEntry, AdminError> {
        self.put(&entry)?;
        debug!(
            entry_id = %entry.entry_id,
            file_id = %entry.file_id,
            element = %entry.storage_element_id,
            reason = ?entry.reason,
            scheduled_at = %entry.scheduled_at,
            "cleanup entry enqueued"
        );
        Ok(entry)
    }

    pub fn get(&self, entry_id: &Uuid) -> Result<Option<CleanupEntry>, AdminError> {
        match self.tree.get(entry_id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Unprocessed entries due at `now`, ordered by priority descending then
    /// schedule time ascending.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<CleanupEntry>, AdminError> {
        let mut due: Vec<CleanupEntry> = self
            .entries()?
            .into_iter()
            .filter(|entry| entry.processed_at.is_none() && entry.scheduled_at <= now)
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.scheduled_at.cmp(&b.scheduled_at))
        });
        Ok(due)
    }

    /// Whether an unprocessed entry already exists for this file+element.
    pub fn has_pending_for(&self, file_id: &FileId, element_id: &str) -> Result<bool, AdminError> {
        Ok(self.entries()?.iter().any(|entry| {
            entry.processed_at.is_none()
                && entry.file_id == *file_id
                && entry.storage_element_id == element_id
        }))
    }

    pub fn mark_processed(
        &self,
        entry_id: &Uuid,
        success: bool,
        error_message: Option<String>,
    ) -> Result<(), AdminError> {
        if let Some(mut entry) = self.get(entry_id)? {
            entry.processed_at = Some(Utc::now());
            entry.success = Some(success);
            entry.error_message = error_message;
            self.put(&entry)?;
        }
        Ok(())
    }

    /// Push the entry back with an incremented retry counter.
    pub fn reschedule(
        &self,
        entry_id: &Uuid,
        scheduled_at: DateTime<Utc>,
        error_message: Option<String>,
    ) -> Result<(), AdminError> {
        if let Some(mut entry) = self.get(entry_id)? {
            entry.retry_count += 1;
            entry.scheduled_at = scheduled_at;
            entry.error_message = error_message;
            self.put(&entry)?;
        }
        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<CleanupEntry>, AdminError> {
        let mut entries = Vec::with_capacity(self.tree.len());
        for item in self.tree.iter() {
            let (_, raw) = item?;
            entries.push(serde_json::from_slice(&raw)?);
        }
        Ok(entries)
    }

    pub fn pending_count(&self) -> Result<usize, AdminError> {
        Ok(self
            .entries()?
            .iter()
            .filter(|entry| entry.processed_at.is_none())
            .count())
    }

    fn put(&self, entry: &CleanupEntry) -> Result<(), AdminError> {
        self.tree
            .insert(entry.entry_id.as_bytes(), serde_json::to_vec(entry)?)?;
        Ok(())
    }
}
