//! Audit trail.
//!
//! Audit entries are recorded on the side so they never block or fail the
//! request path: `record` pushes onto an unbounded channel and returns; a
//! background task persists entries to sled. A write failure is logged and
//! dropped, never surfaced to the caller.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::errors::AdminError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub actor: String,
    pub action: String,
    pub target: String,
    pub outcome: String,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct AuditTrail {
    tree: sled::Tree,
    sender: mpsc::UnboundedSender<AuditEntry>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<AuditEntry>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AuditTrail {
    pub fn open(db: &sled::Db) -> Result<Self, AdminError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Ok(Self {
            tree: db.open_tree("audit_log")?,
            sender,
            receiver: Mutex::new(Some(receiver)),
            handle: Mutex::new(None),
        })
    }

    pub fn start(&self) {
        let Some(mut receiver) = self.receiver.lock().take() else {
            return;
        };
        let tree = self.tree.clone();
        let task = tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                let key = format!("{}:{}", entry.timestamp.timestamp_millis(), entry.entry_id);
                match serde_json::to_vec(&entry) {
                    Ok(raw) => {
                        if let Err(err) = tree.insert(key.as_bytes(), raw) {
                            warn!(error = %err, "audit write failed; entry dropped");
                        }
                    }
                    Err(err) => warn!(error = %err, "audit entry unserializable; dropped"),
                }
            }
        });
        *self.handle.lock() = Some(task);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    /// Fire-and-forget: never blocks, never fails the caller.
    pub fn record(
        &self,
        actor: impl Into<String>,
        action: impl Into<String>,
        target: impl Into<String>,
        outcome: impl Into<String>,
    ) {
        let entry = AuditEntry {
            entry_id: Uuid::new_v4(),
            actor: actor.into(),
            action: action.into(),
            target: target.into(),
            outcome: outcome.into(),
            detail: None,
            timestamp: Utc::now(),
        };
        let _ = self.sender.send(entry);
    }

    pub fn entries(&self) -> Result<Vec<AuditEntry>, AdminError> {
        let mut entries = Vec::new();
        for item in self.tree.iter() {
            let (_, raw) = item?;
            entries.push(serde_json::from_slice(&raw)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recorded_entries_are_persisted_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("admin")).unwrap();
        let trail = AuditTrail::open(&db).unwrap();
        trail.start();

        trail.record("sa_dev", "upload", "file:abc", "success");
        trail.record("sa_dev", "finalize", "file:abc", "success");

        // Give the writer task a moment to drain.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let entries = trail.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "upload");
        assert_eq!(entries[1].action, "finalize");
        trail.stop();
    }
}
