//! Finalize transaction store.
//!
//! Owns the authoritative transaction rows for two-phase finalization. The
//! invariant enforced here: at most one non-terminal transaction per file.
//! `begin` is idempotent — a second finalize for the same file while a
//! transaction is in flight returns the existing row instead of opening a
//! competitor.

use chrono::{Duration, Utc};
use filegrid_core::{FileId, FinalizeStatus, FinalizeTransaction};
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AdminError;

pub struct TransactionStore {
    tree: sled::Tree,
    /// Serializes begin/update so the one-non-terminal-per-file check and
    /// the insert are a single atomic step.
    guard: Mutex<()>,
}

impl TransactionStore {
    pub fn open(db: &sled::Db) -> Result<Self, AdminError> {
        Ok(Self {
            tree: db.open_tree("finalize_transactions")?,
            guard: Mutex::new(()),
        })
    }

    /// Open a transaction for `file_id`, or return the existing non-terminal
    /// one. The boolean is true when a new transaction was created.
    pub fn begin(
        &self,
        file_id: FileId,
        source_element_id: &str,
        target_element_id: &str,
    ) -> Result<(FinalizeTransaction, bool), AdminError> {
        let _guard = self.guard.lock();
        if let Some(existing) = self.scan_active_for_file(&file_id)? {
            info!(
                %file_id,
                transaction_id = %existing.transaction_id,
                status = %existing.status,
                "finalize already in flight; returning existing transaction"
            );
            return Ok((existing, false));
        }
        let now = Utc::now();
        let transaction = FinalizeTransaction {
            transaction_id: Uuid::new_v4(),
            file_id,
            source_element_id: source_element_id.to_string(),
            target_element_id: target_element_id.to_string(),
            status: FinalizeStatus::Copying,
            checksum_source: None,
            checksum_target: None,
            retry_count: 0,
            error_code: None,
            error_message: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.put(&transaction)?;
        info!(%file_id, transaction_id = %transaction.transaction_id, "finalize transaction opened");
        Ok((transaction, true))
    }

    pub fn get(&self, transaction_id: &Uuid) -> Result<Option<FinalizeTransaction>, AdminError> {
        match self.tree.get(transaction_id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn require(&self, transaction_id: &Uuid) -> Result<FinalizeTransaction, AdminError> {
        self.get(transaction_id)?
            .ok_or(AdminError::TransactionNotFound(*transaction_id))
    }

    /// Mutate a non-terminal transaction. Once terminal, rows are immutable.
    pub fn update<F>(&self, transaction_id: &Uuid, mutate: F) -> Result<FinalizeTransaction, AdminError>
    where
        F: FnOnce(&mut FinalizeTransaction),
    {
        let _guard = self.guard.lock();
        let mut transaction = self.require(transaction_id)?;
        if transaction.status.is_terminal() {
            return Err(AdminError::TransactionTerminal(*transaction_id));
        }
        mutate(&mut transaction);
        transaction.updated_at = Utc::now();
        if transaction.status == FinalizeStatus::Completed && transaction.completed_at.is_none() {
            transaction.completed_at = Some(transaction.updated_at);
        }
        self.put(&transaction)?;
        Ok(transaction)
    }

    pub fn active_for_file(&self, file_id: &FileId) -> Result<Option<FinalizeTransaction>, AdminError> {
        let _guard = self.guard.lock();
        self.scan_active_for_file(file_id)
    }

    /// Most recent transaction for the file, terminal or not. Backs the
    /// idempotent answer to finalizing an already-completed file.
    pub fn latest_for_file(&self, file_id: &FileId) -> Result<Option<FinalizeTransaction>, AdminError> {
        let mut latest: Option<FinalizeTransaction> = None;
        for item in self.tree.iter() {
            let (_, raw) = item?;
            let transaction: FinalizeTransaction = serde_json::from_slice(&raw)?;
            if transaction.file_id == *file_id
                && latest
                    .as_ref()
                    .map(|existing| transaction.started_at > existing.started_at)
                    .unwrap_or(true)
            {
                latest = Some(transaction);
            }
        }
        Ok(latest)
    }

    /// Mark transactions stuck in a non-terminal state beyond `timeout` as
    /// failed and hand them back so the coordinator can roll back targets.
    pub fn sweep_stale(&self, timeout: Duration) -> Result<Vec<FinalizeTransaction>, AdminError> {
        let _guard = self.guard.lock();
        let deadline = Utc::now() - timeout;
        let mut swept = Vec::new();
        for item in self.tree.iter() {
            let (_, raw) = item?;
            let mut transaction: FinalizeTransaction = serde_json::from_slice(&raw)?;
            if !transaction.status.is_terminal() && transaction.updated_at < deadline {
                warn!(
                    transaction_id = %transaction.transaction_id,
                    file_id = %transaction.file_id,
                    stuck_in = %transaction.status,
                    "sweeping stale finalize transaction"
                );
                transaction.status = FinalizeStatus::Failed;
                transaction.error_code = Some("timeout".into());
                transaction.error_message =
                    Some("transaction exceeded its deadline and was swept".into());
                transaction.updated_at = Utc::now();
                self.put(&transaction)?;
                swept.push(transaction);
            }
        }
        Ok(swept)
    }

    fn scan_active_for_file(&self, file_id: &FileId) -> Result<Option<FinalizeTransaction>, AdminError> {
        for item in self.tree.iter() {
            let (_, raw) = item?;
            let transaction: FinalizeTransaction = serde_json::from_slice(&raw)?;
            if transaction.file_id == *file_id && !transaction.status.is_terminal() {
                return Ok(Some(transaction));
            }
        }
        Ok(None)
    }

    fn put(&self, transaction: &FinalizeTransaction) -> Result<(), AdminError> {
        self.tree.insert(
            transaction.transaction_id.as_bytes(),
            serde_json::to_vec(transaction)?,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, TransactionStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("admin")).unwrap();
        (dir, TransactionStore::open(&db).unwrap())
    }

    #[test]
    fn begin_is_idempotent_per_file() {
        let (_dir, store) = store();
        let file_id = Uuid::new_v4();
        let (first, created) = store.begin(file_id, "se-edit", "se-rw").unwrap();
        assert!(created);
        let (second, created) = store.begin(file_id, "se-edit", "se-rw").unwrap();
        assert!(!created);
        assert_eq!(first.transaction_id, second.transaction_id);
    }

    #[test]
    fn terminal_transaction_allows_new_begin() {
        let (_dir, store) = store();
        let file_id = Uuid::new_v4();
        let (first, _) = store.begin(file_id, "se-edit", "se-rw").unwrap();
        store
            .update(&first.transaction_id, |tx| tx.status = FinalizeStatus::RolledBack)
            .unwrap();
        let (second, created) = store.begin(file_id, "se-edit", "se-rw").unwrap();
        assert!(created);
        assert_ne!(first.transaction_id, second.transaction_id);
    }

    #[test]
    fn terminal_transactions_are_immutable() {
        let (_dir, store) = store();
        let (tx, _) = store.begin(Uuid::new_v4(), "a", "b").unwrap();
        store
            .update(&tx.transaction_id, |t| t.status = FinalizeStatus::Completed)
            .unwrap();
        let err = store
            .update(&tx.transaction_id, |t| t.status = FinalizeStatus::Failed)
            .unwrap_err();
        assert!(matches!(err, AdminError::TransactionTerminal(_)));
        let row = store.require(&tx.transaction_id).unwrap();
        assert_eq!(row.status, FinalizeStatus::Completed);
        assert!(row.completed_at.is_some());
    }

    #[test]
    fn sweep_marks_stuck_transactions_failed() {
        let (_dir, store) = store();
        let (tx, _) = store.begin(Uuid::new_v4(), "a", "b").unwrap();
        // Nothing is stale yet.
        assert!(store.sweep_stale(Duration::seconds(300)).unwrap().is_empty());
        // With a zero timeout everything non-terminal is stale.
        let swept = store.sweep_stale(Duration::seconds(0)).unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].transaction_id, tx.transaction_id);
        let row = store.require(&tx.transaction_id).unwrap();
        assert_eq!(row.status, FinalizeStatus::Failed);
        assert_eq!(row.error_code.as_deref(), Some("timeout"));
    }
}
