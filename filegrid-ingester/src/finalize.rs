//! Two-phase finalize coordinator.
//!
//! Promotes a temporary file on an EDIT element to a permanent file on an
//! RW element:
//!
//! 1. **Begin** — validate the file, open (or adopt) the transaction row,
//!    select the RW target.
//! 2. **Copy** — stream source → target while hashing independently.
//! 3. **Verify** — the copy's checksum and the source sidecar's checksum
//!    must both equal the recorded file checksum.
//! 4. **Commit** — the file record flips to permanent (publishing
//!    `file:updated` on commit), the transaction completes, and the source
//!    copy is queued for deletion 24 h out.
//! 5. **Rollback** — on any failure: best-effort removal of the partial
//!    target copy, transaction marked rolled back, file record untouched.
//!
//! Transient copy/verify failures retry up to three times with 1 s / 2 s /
//! 4 s backoff. Checksum mismatches never retry. A sweeper fails
//! transactions stuck beyond their deadline and rolls their targets back.

use chrono::Utc;
use filegrid_core::{
    CleanupEntry, CleanupReason, FileId, FinalizeConfig, FinalizeStatus, FinalizeTransaction,
    RetentionPolicy,
};
use filegrid_admin::{
    AdminError, CleanupQueue, ElementDirectory, FileRegistry, TransactionStore,
};
use filegrid_storage::StoreRequest;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::IngestError;
use crate::selector::StorageSelector;

const ERROR_CHECKSUM_MISMATCH: &str = "checksum_mismatch";

pub struct FinalizeCoordinator {
    files: Arc<FileRegistry>,
    transactions: Arc<TransactionStore>,
    cleanup: Arc<CleanupQueue>,
    selector: Arc<StorageSelector>,
    directory: Arc<ElementDirectory>,
    config: FinalizeConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl FinalizeCoordinator {
    pub fn new(
        files: Arc<FileRegistry>,
        transactions: Arc<TransactionStore>,
        cleanup: Arc<CleanupQueue>,
        selector: Arc<StorageSelector>,
        directory: Arc<ElementDirectory>,
        config: FinalizeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            files,
            transactions,
            cleanup,
            selector,
            directory,
            config,
            sweeper: Mutex::new(None),
        })
    }

    /// Start the stale-transaction sweeper.
    pub fn start(self: &Arc<Self>) {
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                coordinator.sweep_stale().await;
            }
        });
        *self.sweeper.lock() = Some(task);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    /// Begin (or adopt) finalization of `file_id`. Returns the transaction
    /// immediately; the phases run in the background. Finalizing a file
    /// whose transaction already completed returns that transaction with no
    /// new side effects.
    pub async fn finalize(self: &Arc<Self>, file_id: FileId) -> Result<FinalizeTransaction, IngestError> {
        let record = match self.files.require(&file_id) {
            Ok(record) => record,
            Err(AdminError::FileNotFound(_)) => {
                return Err(IngestError::Admin(AdminError::FileNotFound(file_id)))
            }
            Err(err) => return Err(err.into()),
        };
        if record.is_deleted() {
            return Err(IngestError::Admin(AdminError::FileDeleted(file_id)));
        }
        if record.finalized_at.is_some() || record.retention_policy == RetentionPolicy::Permanent {
            // Idempotent answer for an already-promoted file.
            if let Some(existing) = self.transactions.latest_for_file(&file_id)? {
                if existing.status == FinalizeStatus::Completed {
                    return Ok(existing);
                }
            }
            return Err(IngestError::Admin(AdminError::AlreadyFinalized(file_id)));
        }

        let target = self
            .selector
            .select(RetentionPolicy::Permanent, record.file_size)?
            .into_iter()
            .next()
            .ok_or(IngestError::NoAvailableStorage)?;

        let (transaction, created) =
            self.transactions
                .begin(file_id, &record.storage_element_id, &target)?;
        if created {
            let coordinator = Arc::clone(self);
            let spawned = transaction.clone();
            tokio::spawn(async move {
                coordinator.run_transaction(spawned).await;
            });
        }
        Ok(transaction)
    }

    /// Current transaction state for the status-polling endpoint.
    pub fn status(&self, transaction_id: &Uuid) -> Result<FinalizeTransaction, IngestError> {
        self.transactions
            .get(transaction_id)?
            .ok_or(IngestError::TransactionNotFound(*transaction_id))
    }

    /// Drive a transaction through copy → verify → commit, rolling back on
    /// failure. Public so tests (and an operator retry path) can run the
    /// phases to completion deterministically.
    pub async fn run_transaction(&self, transaction: FinalizeTransaction) {
        let transaction_id = transaction.transaction_id;
        match self.execute_phases(&transaction).await {
            Ok(()) => {}
            Err(err) => {
                let code = match &err {
                    IngestError::ChecksumMismatch { .. } => ERROR_CHECKSUM_MISMATCH,
                    _ => "finalize_failed",
                };
                error!(
                    %transaction_id,
                    file_id = %transaction.file_id,
                    error = %err,
                    "finalize failed; rolling back"
                );
                self.rollback(&transaction, code, &err.to_string()).await;
            }
        }
    }

    async fn execute_phases(&self, transaction: &FinalizeTransaction) -> Result<(), IngestError> {
        let transaction_id = transaction.transaction_id;
        let file_id = transaction.file_id;
        let record = self.files.require(&file_id)?;

        // Phase 1: copy source → target, hashing independently of both.
        let stored = self
            .with_retries(transaction_id, "copy", || async {
                let source = self
                    .directory
                    .get(&transaction.source_element_id)
                    .ok_or_else(|| IngestError::ElementUnavailable(transaction.source_element_id.clone()))?;
                let target = self
                    .directory
                    .get(&transaction.target_element_id)
                    .ok_or_else(|| IngestError::ElementUnavailable(transaction.target_element_id.clone()))?;
                let (attributes, body) = source.copy_out(file_id).await?;
                let stored = target
                    .store_file(
                        StoreRequest {
                            file_id,
                            original_filename: attributes.original_filename.clone(),
                            content_type: attributes.content_type.clone(),
                            uploaded_by: attributes.uploaded_by.clone(),
                            retention_policy: RetentionPolicy::Permanent,
                            ttl_expires_at: None,
                            description: attributes.description.clone(),
                            tags: attributes.tags.clone(),
                            compressed: attributes.compressed,
                            compression_algorithm: attributes.compression_algorithm.clone(),
                            storage_filename: Some(attributes.storage_filename.clone()),
                        },
                        body,
                    )
                    .await?;
                Ok(stored)
            })
            .await?;

        self.transactions.update(&transaction_id, |tx| {
            tx.status = FinalizeStatus::Copied;
            tx.checksum_target = Some(stored.checksum_sha256.clone());
        })?;

        // Phase 2: verify both sides against the recorded checksum.
        self.transactions.update(&transaction_id, |tx| {
            tx.status = FinalizeStatus::Verifying;
        })?;

        if stored.checksum_sha256 != record.checksum_sha256 {
            return Err(IngestError::ChecksumMismatch {
                expected: record.checksum_sha256.clone(),
                actual: stored.checksum_sha256.clone(),
            });
        }

        let source_checksum = self
            .with_retries(transaction_id, "verify-source", || async {
                let source = self
                    .directory
                    .get(&transaction.source_element_id)
                    .ok_or_else(|| IngestError::ElementUnavailable(transaction.source_element_id.clone()))?;
                Ok(source.sidecar_checksum(file_id).await?)
            })
            .await?;

        self.transactions.update(&transaction_id, |tx| {
            tx.checksum_source = Some(source_checksum.clone());
        })?;

        if source_checksum != record.checksum_sha256 {
            return Err(IngestError::ChecksumMismatch {
                expected: record.checksum_sha256.clone(),
                actual: source_checksum,
            });
        }

        // Commit: the record flips to permanent (publishing file:updated),
        // the transaction completes, and the source gets its delayed GC.
        self.files
            .mark_finalized(&file_id, &transaction.target_element_id, &stored.storage_path)?;
        self.transactions.update(&transaction_id, |tx| {
            tx.status = FinalizeStatus::Completed;
        })?;
        self.cleanup.enqueue(CleanupEntry::new(
            file_id,
            transaction.source_element_id.clone(),
            Utc::now() + chrono::Duration::hours(self.config.cleanup_delay_hours),
            CleanupReason::Finalized,
        ))?;

        info!(
            %transaction_id,
            %file_id,
            target = %transaction.target_element_id,
            "finalize completed"
        );
        Ok(())
    }

    async fn rollback(&self, transaction: &FinalizeTransaction, code: &str, message: &str) {
        // Best-effort removal of the partial copy; the target may never have
        // received it.
        if let Some(target) = self.directory.get(&transaction.target_element_id) {
            match target.compensate_remove(transaction.file_id).await {
                Ok(()) => {}
                Err(filegrid_storage::StorageError::NotFound(_)) => {}
                Err(err) => warn!(
                    transaction_id = %transaction.transaction_id,
                    error = %err,
                    "failed to remove partial target copy during rollback"
                ),
            }
        }
        // The sweeper may have beaten us to a terminal state; that is fine.
        let _ = self.transactions.update(&transaction.transaction_id, |tx| {
            tx.status = FinalizeStatus::RolledBack;
            tx.error_code = Some(code.to_string());
            tx.error_message = Some(message.to_string());
        });
    }

    /// Fail transactions stuck beyond the deadline and roll back their
    /// targets.
    pub async fn sweep_stale(&self) {
        let timeout = chrono::Duration::seconds(self.config.timeout_seconds);
        let swept = match self.transactions.sweep_stale(timeout) {
            Ok(swept) => swept,
            Err(err) => {
                warn!(error = %err, "stale transaction sweep failed");
                return;
            }
        };
        for transaction in swept {
            if let Some(target) = self.directory.get(&transaction.target_element_id) {
                let _ = target.compensate_remove(transaction.file_id).await;
            }
        }
    }

    async fn with_retries<T, F, Fut>(
        &self,
        transaction_id: Uuid,
        phase: &str,
        attempt_fn: F,
    ) -> Result<T, IngestError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, IngestError>>,
    {
        let mut delay = std::time::Duration::from_secs(self.config.backoff_base_secs);
        let mut last_error: Option<IngestError> = None;
        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
                delay *= 2;
                let _ = self.transactions.update(&transaction_id, |tx| {
                    tx.retry_count += 1;
                });
            }
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    warn!(
                        %transaction_id,
                        phase,
                        attempt = attempt + 1,
                        error = %err,
                        "transient finalize failure; will retry"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or(IngestError::Internal(anyhow::anyhow!(
            "finalize phase {phase} exhausted retries"
        ))))
    }
}
