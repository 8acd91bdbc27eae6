//! Download service: full-body and ranged streaming from storage elements.
//!
//! Metadata comes through the multi-level cache; the element is resolved by
//! id and must be in a mode that permits reads. Full downloads stream in
//! 64 KiB chunks with an `ETag` derived from `md5(path|size|mtime)`. Range
//! requests follow RFC 7233; multiple ranges yield the parts of a
//! `multipart/byteranges` response.

use filegrid_core::{FileId, Operation};
use filegrid_admin::ElementDirectory;
use filegrid_storage::ByteStream;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::cache::MetadataCache;
use crate::errors::QueryError;
use crate::range::parse_range;

/// One part of a multi-range response.
pub struct RangePart {
    /// Inclusive byte window.
    pub range: (u64, u64),
    pub stream: ByteStream,
}

pub enum DownloadContent {
    Full {
        stream: ByteStream,
    },
    Single {
        range: (u64, u64),
        stream: ByteStream,
    },
    Multi {
        boundary: String,
        parts: Vec<RangePart>,
    },
}

pub struct DownloadResponse {
    pub file_id: FileId,
    pub filename: String,
    pub content_type: String,
    pub total_length: u64,
    pub etag: String,
    pub content: DownloadContent,
}

impl std::fmt::Debug for DownloadContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadContent::Full { .. } => f.debug_struct("Full").finish(),
            DownloadContent::Single { range, .. } => {
                f.debug_struct("Single").field("range", range).finish()
            }
            DownloadContent::Multi { boundary, parts } => f
                .debug_struct("Multi")
                .field("boundary", boundary)
                .field("parts_count", &parts.len())
                .finish(),
        }
    }
}

impl std::fmt::Debug for DownloadResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadResponse")
            .field("file_id", &self.file_id)
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("total_length", &self.total_length)
            .field("etag", &self.etag)
            .field("content", &self.content)
            .finish()
    }
}

pub struct DownloadService {
    cache: Arc<MetadataCache>,
    directory: Arc<ElementDirectory>,
}

impl DownloadService {
    pub fn new(cache: Arc<MetadataCache>, directory: Arc<ElementDirectory>) -> Self {
        Self { cache, directory }
    }

    pub async fn download(
        &self,
        file_id: FileId,
        range_header: Option<&str>,
    ) -> Result<DownloadResponse, QueryError> {
        let record = self
            .cache
            .get(&file_id)
            .ok_or(QueryError::FileNotFound(file_id))?;
        let element = self
            .directory
            .get(&record.storage_element_id)
            .ok_or_else(|| QueryError::ElementUnavailable(record.storage_element_id.clone()))?;

        let mode = element.current_mode();
        if !mode.permits(Operation::Read) {
            return Err(QueryError::ModeForbidden(mode));
        }

        let (row, stat) = element.file_stat(file_id).await?;
        let total_length = stat.size;
        let etag = format!(
            "\"{:x}\"",
            md5::compute(format!(
                "{}|{}|{}",
                row.rel_path,
                stat.size,
                stat.modified.timestamp()
            ))
        );

        let content = match range_header {
            None => {
                let (_, stream) = element.open_read(file_id, None).await?;
                DownloadContent::Full { stream }
            }
            Some(header) => {
                let ranges = parse_range(header, total_length)?;
                debug!(%file_id, ranges = ranges.len(), "serving ranged download");
                if ranges.len() == 1 {
                    let range = ranges[0];
                    let (_, stream) = element.open_read(file_id, Some(range)).await?;
                    DownloadContent::Single { range, stream }
                } else {
                    let boundary = format!("filegrid_{}", Uuid::new_v4().simple());
                    let mut parts = Vec::with_capacity(ranges.len());
                    for range in ranges {
                        let (_, stream) = element.open_read(file_id, Some(range)).await?;
                        parts.push(RangePart { range, stream });
                    }
                    DownloadContent::Multi { boundary, parts }
                }
            }
        };

        Ok(DownloadResponse {
            file_id,
            filename: record.original_filename.clone(),
            content_type: record.content_type.clone(),
            total_length,
            etag,
            content,
        })
    }
}
