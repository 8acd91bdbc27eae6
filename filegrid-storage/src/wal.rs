//! Append-only write-ahead log, one per storage element.
//!
//! Records are JSON lines; appends flush before returning. Readers may scan
//! the file concurrently with writers — a torn final line (crash mid-append)
//! is skipped on replay rather than poisoning the whole log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::errors::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalOperation {
    Upload,
    Update,
    Delete,
    GcDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalStatus {
    Committed,
    Aborted,
}

/// One logged intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    pub wal_id: Uuid,
    pub transaction_id: Uuid,
    pub operation: WalOperation,
    pub status: WalStatus,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl WalRecord {
    pub fn committed(
        transaction_id: Uuid,
        operation: WalOperation,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            wal_id: Uuid::new_v4(),
            transaction_id,
            operation,
            status: WalStatus::Committed,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Append-only JSONL log.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<tokio::fs::File>,
}

impl WriteAheadLog {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    pub async fn append(&self, record: &WalRecord) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read every intact record in append order.
    pub async fn replay(&self) -> Result<Vec<WalRecord>, StorageError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut records = Vec::new();
        let lines: Vec<&str> = raw.lines().collect();
        for (idx, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) if idx == lines.len() - 1 => {
                    warn!(path = %self.path.display(), error = %err, "skipping torn WAL tail");
                }
                Err(err) => {
                    return Err(StorageError::Corrupt(format!(
                        "WAL line {} unreadable: {err}",
                        idx + 1
                    )));
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("element.wal")).await.unwrap();
        let tx = Uuid::new_v4();
        wal.append(&WalRecord::committed(
            tx,
            WalOperation::Upload,
            serde_json::json!({"file_id": "x"}),
        ))
        .await
        .unwrap();
        wal.append(&WalRecord::committed(tx, WalOperation::Delete, serde_json::json!({})))
            .await
            .unwrap();

        let records = wal.replay().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].operation, WalOperation::Upload);
        assert_eq!(records[1].operation, WalOperation::Delete);
    }

    #[tokio::test]
    async fn torn_tail_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("element.wal");
        let wal = WriteAheadLog::open(&path).await.unwrap();
        wal.append(&WalRecord::committed(
            Uuid::new_v4(),
            WalOperation::Upload,
            serde_json::json!({}),
        ))
        .await
        .unwrap();
        // Simulate a crash mid-append.
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"wal_id\": \"trunc").unwrap();

        let records = wal.replay().await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn replay_of_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("fresh.wal")).await.unwrap();
        tokio::fs::remove_file(dir.path().join("fresh.wal")).await.unwrap();
        assert!(wal.replay().await.unwrap().is_empty());
    }
}
