//! Searchable metadata index.
//!
//! A derived copy of the file registry, keyed by file id and fed by
//! lifecycle events. Deletion leaves a tombstone so a late-arriving
//! `file:created` for an already-deleted file can never resurrect the row;
//! tombstones clear on a full rebuild.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use filegrid_core::{FileId, FileRecord};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One searchable row: the metadata snapshot plus cache bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedFile {
    #[serde(flatten)]
    pub record: FileRecord,
    pub cache_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Exact,
    #[default]
    Partial,
    Fulltext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Name,
    Size,
    #[default]
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub filename: Option<String>,
    pub file_extension: Option<String>,
    pub tags: Option<Vec<String>>,
    pub username: Option<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub mode: SearchMode,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub sort_by: Option<SortBy>,
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<CachedFile>,
    pub total_count: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

pub struct SearchIndex {
    rows: DashMap<FileId, CachedFile>,
    tombstones: DashMap<FileId, DateTime<Utc>>,
}

impl Default for SearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchIndex {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            tombstones: DashMap::new(),
        }
    }

    /// `file:created` handler. Idempotent; refuses to resurrect a file the
    /// same instance already saw deleted.
    pub fn upsert(&self, record: FileRecord) {
        if self.tombstones.contains_key(&record.file_id) {
            return;
        }
        self.rows.insert(
            record.file_id,
            CachedFile {
                record,
                cache_updated_at: Utc::now(),
            },
        );
    }

    /// `file:updated` handler: update in place, fall back to insert when the
    /// row is missing (recovery path).
    pub fn update_or_insert(&self, record: FileRecord) {
        self.upsert(record);
    }

    /// `file:deleted` handler: hard delete plus tombstone.
    pub fn remove(&self, file_id: &FileId) {
        self.rows.remove(file_id);
        self.tombstones.insert(*file_id, Utc::now());
    }

    pub fn get(&self, file_id: &FileId) -> Option<CachedFile> {
        self.rows.get(file_id).map(|row| row.clone())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Operator-triggered full rebuild from the authoritative registry.
    /// Clears tombstones: the authoritative store knows best now.
    pub fn rebuild(&self, records: Vec<FileRecord>) {
        self.rows.clear();
        self.tombstones.clear();
        let count = records.len();
        for record in records {
            self.upsert(record);
        }
        info!(rows = count, "search index rebuilt from authoritative registry");
    }

    pub fn search(&self, request: &SearchRequest) -> SearchResponse {
        let limit = request.limit.unwrap_or(100).clamp(1, 1000);
        let offset = request.offset.unwrap_or(0);

        let mut matches: Vec<CachedFile> = self
            .rows
            .iter()
            .filter(|row| Self::matches(&row.record, request))
            .map(|row| row.clone())
            .collect();

        let sort_by = request.sort_by.unwrap_or_default();
        let sort_order = request.sort_order.unwrap_or_default();
        matches.sort_by(|a, b| {
            let ordering = match sort_by {
                SortBy::Name => a
                    .record
                    .original_filename
                    .to_lowercase()
                    .cmp(&b.record.original_filename.to_lowercase()),
                SortBy::Size => a.record.file_size.cmp(&b.record.file_size),
                SortBy::CreatedAt => a.record.created_at.cmp(&b.record.created_at),
            };
            match sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let total_count = matches.len();
        let results: Vec<CachedFile> = matches.into_iter().skip(offset).take(limit).collect();
        let has_more = offset + results.len() < total_count;
        SearchResponse {
            results,
            total_count,
            limit,
            offset,
            has_more,
        }
    }

    fn matches(record: &FileRecord, request: &SearchRequest) -> bool {
        if let Some(query) = request.query.as_deref() {
            if !Self::text_match(record, query, request.mode) {
                return false;
            }
        }
        if let Some(filename) = request.filename.as_deref() {
            let candidate = &record.original_filename;
            let hit = match request.mode {
                SearchMode::Exact => candidate == filename,
                SearchMode::Partial | SearchMode::Fulltext => candidate
                    .to_lowercase()
                    .contains(&filename.to_lowercase()),
            };
            if !hit {
                return false;
            }
        }
        if let Some(extension) = request.file_extension.as_deref() {
            let wanted = extension.trim_start_matches('.').to_lowercase();
            let actual = record
                .original_filename
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_lowercase())
                .unwrap_or_default();
            if actual != wanted {
                return false;
            }
        }
        if let Some(tags) = request.tags.as_ref() {
            let have: Vec<String> = record.tags.iter().map(|tag| tag.to_lowercase()).collect();
            if !tags.iter().all(|tag| have.contains(&tag.to_lowercase())) {
                return false;
            }
        }
        if let Some(username) = request.username.as_deref() {
            if record.uploaded_by != username {
                return false;
            }
        }
        if let Some(min_size) = request.min_size {
            if record.file_size < min_size {
                return false;
            }
        }
        if let Some(max_size) = request.max_size {
            if record.file_size > max_size {
                return false;
            }
        }
        if let Some(after) = request.created_after {
            if record.created_at < after {
                return false;
            }
        }
        if let Some(before) = request.created_before {
            if record.created_at > before {
                return false;
            }
        }
        true
    }

    fn text_match(record: &FileRecord, query: &str, mode: SearchMode) -> bool {
        let haystack = format!(
            "{} {} {}",
            record.original_filename,
            record.description.as_deref().unwrap_or(""),
            record.tags.join(" ")
        )
        .to_lowercase();
        match mode {
            SearchMode::Exact => {
                record.original_filename == query
                    || record.description.as_deref() == Some(query)
                    || record.tags.iter().any(|tag| tag == query)
            }
            SearchMode::Partial => haystack.contains(&query.to_lowercase()),
            SearchMode::Fulltext => query
                .split_whitespace()
                .all(|term| haystack.contains(&term.to_lowercase())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filegrid_core::RetentionPolicy;
    use uuid::Uuid;

    fn record(name: &str, size: u64, user: &str, tags: &[&str]) -> FileRecord {
        FileRecord {
            file_id: Uuid::new_v4(),
            original_filename: name.into(),
            storage_filename: format!("{name}_u_20260101T000000_x"),
            file_size: size,
            checksum_sha256: "00".into(),
            content_type: "application/octet-stream".into(),
            retention_policy: RetentionPolicy::Permanent,
            ttl_expires_at: None,
            finalized_at: Some(Utc::now()),
            storage_element_id: "se-rw".into(),
            storage_path: "2026/01/01/00".into(),
            uploaded_by: user.into(),
            description: Some(format!("description of {name}")),
            tags: tags.iter().map(|tag| tag.to_string()).collect(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn populated() -> SearchIndex {
        let index = SearchIndex::new();
        index.upsert(record("quarterly_report.pdf", 5000, "ivanov", &["finance", "q1"]));
        index.upsert(record("holiday_photo.jpg", 2_000_000, "petrov", &["photos"]));
        index.upsert(record("report_final.pdf", 9000, "ivanov", &["finance"]));
        index
    }

    #[test]
    fn partial_query_matches_substrings() {
        let index = populated();
        let response = index.search(&SearchRequest {
            query: Some("report".into()),
            ..Default::default()
        });
        assert_eq!(response.total_count, 2);
    }

    #[test]
    fn exact_mode_requires_full_equality() {
        let index = populated();
        let response = index.search(&SearchRequest {
            query: Some("report".into()),
            mode: SearchMode::Exact,
            ..Default::default()
        });
        assert_eq!(response.total_count, 0);
        let response = index.search(&SearchRequest {
            query: Some("quarterly_report.pdf".into()),
            mode: SearchMode::Exact,
            ..Default::default()
        });
        assert_eq!(response.total_count, 1);
    }

    #[test]
    fn fulltext_requires_all_terms() {
        let index = populated();
        let response = index.search(&SearchRequest {
            query: Some("report finance".into()),
            mode: SearchMode::Fulltext,
            ..Default::default()
        });
        assert_eq!(response.total_count, 2);
        let response = index.search(&SearchRequest {
            query: Some("report photos".into()),
            mode: SearchMode::Fulltext,
            ..Default::default()
        });
        assert_eq!(response.total_count, 0);
    }

    #[test]
    fn filters_compose() {
        let index = populated();
        let response = index.search(&SearchRequest {
            file_extension: Some("pdf".into()),
            username: Some("ivanov".into()),
            min_size: Some(6000),
            ..Default::default()
        });
        assert_eq!(response.total_count, 1);
        assert_eq!(response.results[0].record.original_filename, "report_final.pdf");
    }

    #[test]
    fn tag_filter_requires_all_tags() {
        let index = populated();
        let response = index.search(&SearchRequest {
            tags: Some(vec!["finance".into(), "q1".into()]),
            ..Default::default()
        });
        assert_eq!(response.total_count, 1);
    }

    #[test]
    fn sorting_and_pagination() {
        let index = populated();
        let response = index.search(&SearchRequest {
            sort_by: Some(SortBy::Size),
            sort_order: Some(SortOrder::Asc),
            limit: Some(2),
            ..Default::default()
        });
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].record.file_size, 5000);
        assert!(response.has_more);

        let next = index.search(&SearchRequest {
            sort_by: Some(SortBy::Size),
            sort_order: Some(SortOrder::Asc),
            limit: Some(2),
            offset: Some(2),
            ..Default::default()
        });
        assert_eq!(next.results.len(), 1);
        assert!(!next.has_more);
    }

    #[test]
    fn limit_is_clamped() {
        let index = populated();
        let response = index.search(&SearchRequest {
            limit: Some(5000),
            ..Default::default()
        });
        assert_eq!(response.limit, 1000);
        let response = index.search(&SearchRequest {
            limit: Some(0),
            ..Default::default()
        });
        assert_eq!(response.limit, 1);
    }

    #[test]
    fn tombstone_blocks_late_create() {
        let index = SearchIndex::new();
        let row = record("ghost.bin", 10, "u", &[]);
        let file_id = row.file_id;
        index.upsert(row.clone());
        index.remove(&file_id);
        // A replayed create must not resurrect the row.
        index.upsert(row);
        assert!(index.get(&file_id).is_none());
    }

    #[test]
    fn rebuild_clears_tombstones() {
        let index = SearchIndex::new();
        let row = record("back.bin", 10, "u", &[]);
        let file_id = row.file_id;
        index.upsert(row.clone());
        index.remove(&file_id);
        index.rebuild(vec![row]);
        assert!(index.get(&file_id).is_some());
    }
}
