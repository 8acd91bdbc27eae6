//! # Filegrid Query Service
//!
//! The read side of the platform. A searchable metadata index kept in sync
//! with the control plane through lifecycle events (applied idempotently,
//! rebuildable from the authoritative registry after subscriber downtime), a
//! multi-level metadata cache (in-process LRU → shared registry →
//! authoritative store), and a download service with RFC 7233 range support,
//! ETags, and 64 KiB chunked streaming.

mod cache;
mod download;
mod errors;
mod index;
mod range;
mod sync;

pub use cache::MetadataCache;
pub use download::{DownloadContent, DownloadResponse, DownloadService, RangePart};
pub use errors::QueryError;
pub use index::{
    CachedFile, SearchIndex, SearchMode, SearchRequest, SearchResponse, SortBy, SortOrder,
};
pub use range::parse_range;
pub use sync::CacheSyncService;
