//! Common type definitions shared across all filegrid services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique identifier of a stored file.
pub type FileId = Uuid;

/// Retention lifecycle of a file.
///
/// Temporary files live on an EDIT element with a TTL and must be finalized
/// to survive; permanent files are the product of finalization and live on an
/// RW element without a TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    Temporary,
    Permanent,
}

impl RetentionPolicy {
    /// Storage mode an element must be in to accept a file of this policy.
    pub fn required_mode(&self) -> StorageMode {
        match self {
            RetentionPolicy::Temporary => StorageMode::Edit,
            RetentionPolicy::Permanent => StorageMode::Rw,
        }
    }
}

impl std::fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetentionPolicy::Temporary => write!(f, "temporary"),
            RetentionPolicy::Permanent => write!(f, "permanent"),
        }
    }
}

/// Operational mode of a storage element.
///
/// The mode decides which file operations the element accepts. Transition
/// rules live in the storage crate's state machine; the permission matrix is
/// intrinsic to the mode itself and lives here so that every service can
/// check it without holding an element handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Full CRUD; hosts short-lived in-progress uploads.
    Edit,
    /// Create/read/update but no delete; permanent storage target.
    Rw,
    /// Read-only.
    Ro,
    /// Archive: metadata access only.
    Ar,
}

/// A file operation subject to mode permission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Metadata,
}

impl StorageMode {
    /// Whether `operation` is legal in this mode.
    pub fn permits(&self, operation: Operation) -> bool {
        use Operation::*;
        match self {
            StorageMode::Edit => matches!(operation, Create | Read | Update | Delete | Metadata),
            StorageMode::Rw => matches!(operation, Create | Read | Update | Metadata),
            StorageMode::Ro => matches!(operation, Read | Metadata),
            StorageMode::Ar => matches!(operation, Metadata),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Edit => "edit",
            StorageMode::Rw => "rw",
            StorageMode::Ro => "ro",
            StorageMode::Ar => "ar",
        }
    }
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "edit" => Ok(StorageMode::Edit),
            "rw" => Ok(StorageMode::Rw),
            "ro" => Ok(StorageMode::Ro),
            "ar" => Ok(StorageMode::Ar),
            other => Err(format!("unknown storage mode: {other}")),
        }
    }
}

/// Authoritative file record, owned by the admin service.
///
/// The record is the source of truth for a file's identity and placement.
/// Storage elements additionally keep an attribute sidecar next to the data
/// file; the query service keeps a derived searchable copy fed by events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: FileId,
    pub original_filename: String,
    /// Uniquely suffixed on-disk name: `{stem}_{username}_{ts}_{uuid}.{ext}`.
    pub storage_filename: String,
    pub file_size: u64,
    /// Hex-encoded SHA-256 of the persisted bytes.
    pub checksum_sha256: String,
    pub content_type: String,
    pub retention_policy: RetentionPolicy,
    /// Present iff `retention_policy == Temporary`.
    pub ttl_expires_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub storage_element_id: String,
    /// Directory prefix below the element root, `YYYY/MM/DD/HH`.
    pub storage_path: String,
    pub uploaded_by: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// Path of the data file relative to the element root.
    pub fn relative_path(&self) -> String {
        format!("{}/{}", self.storage_path.trim_end_matches('/'), self.storage_filename)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Backing store kind of a storage element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    S3,
}

/// Reachability status of a storage element as seen by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementStatus {
    Online,
    Degraded,
    Offline,
}

/// Poll-derived health of a storage element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// A storage element as registered with the admin service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementRegistration {
    /// Stable identifier, e.g. `storage-element-01`.
    pub element_id: String,
    pub api_url: String,
    pub mode: StorageMode,
    pub storage_type: StorageType,
    /// Lower is preferred by the selector.
    pub priority: u32,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub status: ElementStatus,
    pub last_seen: DateTime<Utc>,
}

/// Capacity record published by the monitor into the shared registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityRecord {
    pub element_id: String,
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub percent_used: f64,
    pub health: ElementHealth,
    pub mode: StorageMode,
    pub endpoint: String,
    pub last_poll: DateTime<Utc>,
}

impl CapacityRecord {
    /// Sorted-index score: priority bands first, available bytes within a band.
    pub fn index_score(&self, priority: u32) -> u128 {
        priority as u128 * 1_000_000_000u128 + self.available as u128
    }
}

/// State of a two-phase finalize transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeStatus {
    Copying,
    Copied,
    Verifying,
    Completed,
    Failed,
    RolledBack,
}

impl FinalizeStatus {
    /// Completed, failed and rolled-back transactions never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FinalizeStatus::Completed | FinalizeStatus::Failed | FinalizeStatus::RolledBack
        )
    }

    /// Progress mapping used by the status polling endpoint.
    pub fn progress_percent(&self) -> u8 {
        match self {
            FinalizeStatus::Copying => 25,
            FinalizeStatus::Copied => 50,
            FinalizeStatus::Verifying => 75,
            FinalizeStatus::Completed => 100,
            FinalizeStatus::Failed | FinalizeStatus::RolledBack => 0,
        }
    }
}

impl std::fmt::Display for FinalizeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FinalizeStatus::Copying => "copying",
            FinalizeStatus::Copied => "copied",
            FinalizeStatus::Verifying => "verifying",
            FinalizeStatus::Completed => "completed",
            FinalizeStatus::Failed => "failed",
            FinalizeStatus::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// A finalize transaction promoting a temporary file to permanent storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeTransaction {
    pub transaction_id: Uuid,
    pub file_id: FileId,
    pub source_element_id: String,
    pub target_element_id: String,
    pub status: FinalizeStatus,
    /// Checksum re-read from the source sidecar during verification.
    pub checksum_source: Option<String>,
    /// Checksum computed independently while copying to the target.
    pub checksum_target: Option<String>,
    pub retry_count: u32,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Why a file was enqueued for deferred deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupReason {
    TtlExpired,
    Finalized,
    Orphaned,
    Manual,
}

/// Deferred-deletion queue entry, owned by the admin service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupEntry {
    pub entry_id: Uuid,
    pub file_id: FileId,
    pub storage_element_id: String,
    pub scheduled_at: DateTime<Utc>,
    /// Higher priority entries are processed first.
    pub priority: i32,
    pub reason: CleanupReason,
    pub processed_at: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CleanupEntry {
    pub fn new(
        file_id: FileId,
        storage_element_id: impl Into<String>,
        scheduled_at: DateTime<Utc>,
        reason: CleanupReason,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            file_id,
            storage_element_id: storage_element_id.into(),
            scheduled_at,
            priority: 0,
            reason,
            processed_at: None,
            success: None,
            retry_count: 0,
            error_message: None,
            created_at: Utc::now(),
        }
    }
}
