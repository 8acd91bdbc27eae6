//! Storage backends.
//!
//! The backend trait is the seam between the element's semantics (modes,
//! sidecars, WAL, catalog) and raw byte persistence. The local filesystem
//! backend is the one that ships; an object-store implementation plugs in
//! behind the same trait.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::errors::StorageError;

/// Streamed body of a file, in order, as it comes off the wire or disk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static>>;

/// Limits enforced while a body is being written.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteLimits {
    /// Upload ceiling; exceeding it aborts the write.
    pub max_size: Option<u64>,
    /// Free bytes on the element; exceeding it aborts with an
    /// insufficient-space error (the HTTP 507 path).
    pub available: Option<u64>,
}

/// Outcome of a completed streaming write.
#[derive(Debug, Clone)]
pub struct WriteReceipt {
    pub size: u64,
    /// Hex SHA-256 of the bytes as persisted.
    pub checksum_sha256: String,
}

/// Size and mtime of a stored object, used for ETags.
#[derive(Debug, Clone)]
pub struct FileStat {
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Stream `body` into `rel_path`, hashing and counting on the fly.
    /// The write lands under a temporary name and is renamed into place only
    /// once complete, so readers never observe a partial file.
    async fn write_stream(
        &self,
        rel_path: &str,
        body: ByteStream,
        limits: WriteLimits,
    ) -> Result<WriteReceipt, StorageError>;

    /// Open `rel_path` for reading, optionally restricted to an inclusive
    /// byte range, yielding chunks of at most `chunk_size`.
    async fn read_stream(
        &self,
        rel_path: &str,
        range: Option<(u64, u64)>,
        chunk_size: usize,
    ) -> Result<ByteStream, StorageError>;

    async fn read_all(&self, rel_path: &str) -> Result<Bytes, StorageError>;

    async fn delete(&self, rel_path: &str) -> Result<(), StorageError>;

    async fn exists(&self, rel_path: &str) -> bool;

    async fn stat(&self, rel_path: &str) -> Result<FileStat, StorageError>;

    /// Relative paths of every stored object whose name ends with `suffix`.
    async fn list_with_suffix(&self, suffix: &str) -> Result<Vec<String>, StorageError>;

    fn root(&self) -> &Path;
}

/// Filesystem-backed storage rooted at a single directory.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Resolve a relative path below the root, rejecting anything that could
    /// escape it. Paths are produced internally, but metadata can be fed
    /// from elsewhere (a poisoned cache row, a crafted registry record), so
    /// the check stays on every access.
    fn resolve(&self, rel_path: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(rel_path);
        if rel.is_absolute() {
            return Err(StorageError::PathTraversal(rel_path.to_string()));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(StorageError::PathTraversal(rel_path.to_string())),
            }
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn write_stream(
        &self,
        rel_path: &str,
        mut body: ByteStream,
        limits: WriteLimits,
    ) -> Result<WriteReceipt, StorageError> {
        let final_path = self.resolve(rel_path)?;
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file_name = final_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| StorageError::PathTraversal(rel_path.to_string()))?;
        let tmp_path = final_path.with_file_name(format!("{file_name}.tmp"));

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;

        let outcome: Result<(), StorageError> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                size += chunk.len() as u64;
                if let Some(max) = limits.max_size {
                    if size > max {
                        return Err(StorageError::FileTooLarge { size, max });
                    }
                }
                if let Some(available) = limits.available {
                    if size > available {
                        return Err(StorageError::InsufficientSpace {
                            needed: size,
                            available,
                        });
                    }
                }
                hasher.update(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = outcome {
            drop(file);
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        tokio::fs::rename(&tmp_path, &final_path).await?;
        let checksum = hex::encode(hasher.finalize());
        debug!(path = rel_path, size, "stored object");
        Ok(WriteReceipt {
            size,
            checksum_sha256: checksum,
        })
    }

    async fn read_stream(
        &self,
        rel_path: &str,
        range: Option<(u64, u64)>,
        chunk_size: usize,
    ) -> Result<ByteStream, StorageError> {
        let path = self.resolve(rel_path)?;
        let mut file = tokio::fs::File::open(&path).await.map_err(map_not_found)?;
        match range {
            Some((start, end)) => {
                file.seek(std::io::SeekFrom::Start(start)).await?;
                let take = tokio::io::AsyncReadExt::take(file, end - start + 1);
                Ok(Box::pin(ReaderStream::with_capacity(take, chunk_size)))
            }
            None => Ok(Box::pin(ReaderStream::with_capacity(file, chunk_size))),
        }
    }

    async fn read_all(&self, rel_path: &str) -> Result<Bytes, StorageError> {
        let path = self.resolve(rel_path)?;
        Ok(Bytes::from(tokio::fs::read(&path).await.map_err(map_not_found)?))
    }

    async fn delete(&self, rel_path: &str) -> Result<(), StorageError> {
        let path = self.resolve(rel_path)?;
        tokio::fs::remove_file(&path).await.map_err(map_not_found)?;
        Ok(())
    }

    async fn exists(&self, rel_path: &str) -> bool {
        match self.resolve(rel_path) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn stat(&self, rel_path: &str) -> Result<FileStat, StorageError> {
        let path = self.resolve(rel_path)?;
        let meta = tokio::fs::metadata(&path).await.map_err(map_not_found)?;
        let modified: DateTime<Utc> = meta
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());
        Ok(FileStat {
            size: meta.len(),
            modified,
        })
    }

    async fn list_with_suffix(&self, suffix: &str) -> Result<Vec<String>, StorageError> {
        let mut results = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if entry.file_type().await?.is_dir() {
                    // Internal bookkeeping (catalog, WAL) lives under dot
                    // directories and is not part of the object space.
                    if !name.starts_with('.') {
                        pending.push(path);
                    }
                } else if name.ends_with(suffix) {
                    if let Ok(rel) = path.strip_prefix(&self.root) {
                        results.push(rel.to_string_lossy().replace('\\', "/"));
                    }
                }
            }
        }
        Ok(results)
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

fn map_not_found(err: std::io::Error) -> StorageError {
    StorageError::Io(err)
}

/// Wrap an in-memory body as a [`ByteStream`]; used by services that have
/// the whole payload at hand and by tests.
pub fn bytes_stream(body: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move {
        Ok::<_, std::io::Error>(body)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path()).unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let (_dir, backend) = backend();
        let receipt = backend
            .write_stream("2026/01/10/15/a.bin", bytes_stream(Bytes::from_static(b"hello")), WriteLimits::default())
            .await
            .unwrap();
        assert_eq!(receipt.size, 5);
        let mut hasher = Sha256::new();
        hasher.update(b"hello");
        assert_eq!(receipt.checksum_sha256, hex::encode(hasher.finalize()));

        let body = backend.read_all("2026/01/10/15/a.bin").await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn oversized_write_is_aborted_and_cleaned_up() {
        let (dir, backend) = backend();
        let limits = WriteLimits {
            max_size: Some(3),
            available: None,
        };
        let err = backend
            .write_stream("x/big.bin", bytes_stream(Bytes::from_static(b"toolarge")), limits)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::FileTooLarge { .. }));
        // Neither the final file nor the temp file survives.
        assert!(!backend.exists("x/big.bin").await);
        assert!(std::fs::read_dir(dir.path().join("x"))
            .map(|entries| entries.count() == 0)
            .unwrap_or(true));
    }

    #[tokio::test]
    async fn exhausted_space_surfaces_insufficient_space() {
        let (_dir, backend) = backend();
        let limits = WriteLimits {
            max_size: None,
            available: Some(2),
        };
        let err = backend
            .write_stream("x/f.bin", bytes_stream(Bytes::from_static(b"abc")), limits)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InsufficientSpace { .. }));
    }

    #[tokio::test]
    async fn range_read_returns_exact_window() {
        let (_dir, backend) = backend();
        backend
            .write_stream("f.bin", bytes_stream(Bytes::from_static(b"0123456789")), WriteLimits::default())
            .await
            .unwrap();
        let mut stream = backend.read_stream("f.bin", Some((2, 5)), 64).await.unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(&collected, b"2345");
    }

    #[tokio::test]
    async fn traversal_paths_are_rejected() {
        let (_dir, backend) = backend();
        for bad in ["../escape.bin", "a/../../b", "/etc/passwd"] {
            let err = backend.read_all(bad).await.unwrap_err();
            assert!(matches!(err, StorageError::PathTraversal(_)), "path {bad:?}");
        }
    }

    #[tokio::test]
    async fn list_with_suffix_walks_date_buckets() {
        let (_dir, backend) = backend();
        for rel in ["2026/01/01/00/a.attr.json", "2026/01/02/03/b.attr.json", "2026/01/02/03/b.bin"] {
            backend
                .write_stream(rel, bytes_stream(Bytes::from_static(b"{}")), WriteLimits::default())
                .await
                .unwrap();
        }
        let mut found = backend.list_with_suffix(".attr.json").await.unwrap();
        found.sort();
        assert_eq!(
            found,
            vec!["2026/01/01/00/a.attr.json", "2026/01/02/03/b.attr.json"]
        );
    }
}
