//! Attribute sidecars: the authoritative per-file metadata.
//!
//! Every data file has a sibling `{storage_filename}.attr.json`. The catalog
//! is derived from sidecars and can always be rebuilt from them; the sidecar
//! is written before the catalog row precisely so a crash between the two is
//! recoverable.

use chrono::{DateTime, Utc};
use filegrid_core::{FileId, RetentionPolicy};
use serde::{Deserialize, Serialize};

/// Suffix appended to a data file's relative path to form its sidecar path.
pub const SIDECAR_SUFFIX: &str = ".attr.json";

/// Authoritative metadata stored next to the data file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttributes {
    pub file_id: FileId,
    pub original_filename: String,
    pub storage_filename: String,
    pub file_size: u64,
    pub checksum_sha256: String,
    pub content_type: String,
    pub retention_policy: RetentionPolicy,
    pub ttl_expires_at: Option<DateTime<Utc>>,
    pub uploaded_by: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default)]
    pub compression_algorithm: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sidecar path for a data file's relative path.
pub fn sidecar_rel_path(data_rel_path: &str) -> String {
    format!("{data_rel_path}{SIDECAR_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn sidecar_path_is_sibling_with_suffix() {
        assert_eq!(
            sidecar_rel_path("2026/01/10/15/report_u_t_id.pdf"),
            "2026/01/10/15/report_u_t_id.pdf.attr.json"
        );
    }

    #[test]
    fn attributes_roundtrip_as_json() {
        let attrs = FileAttributes {
            file_id: Uuid::new_v4(),
            original_filename: "report.pdf".into(),
            storage_filename: "report_u_20260110T000000_x.pdf".into(),
            file_size: 42,
            checksum_sha256: "00".into(),
            content_type: "application/pdf".into(),
            retention_policy: RetentionPolicy::Temporary,
            ttl_expires_at: Some(Utc::now()),
            uploaded_by: "u".into(),
            description: Some("quarterly".into()),
            tags: vec!["q1".into()],
            compressed: false,
            compression_algorithm: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let raw = serde_json::to_string(&attrs).unwrap();
        let back: FileAttributes = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.file_id, attrs.file_id);
        assert_eq!(back.retention_policy, RetentionPolicy::Temporary);
    }
}
