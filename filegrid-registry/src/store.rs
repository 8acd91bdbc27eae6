//! TTL'd record store and sorted indices.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tracing::trace;

struct Record {
    value: serde_json::Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Record {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

struct IndexEntry {
    score: u128,
    expires_at: Option<DateTime<Utc>>,
}

/// A member of a sorted index together with its score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredMember {
    pub member: String,
    pub score: u128,
}

/// Shared key/value store with per-record TTLs and sorted indices.
///
/// Records are JSON documents keyed by string. Expired records are invisible
/// to readers and lazily purged. Sorted indices map string members to `u128`
/// scores and are range-read in ascending score order — the capacity monitor
/// writes them, the selector reads them in a single call.
pub struct RegistryStore {
    records: DashMap<String, Record>,
    indices: DashMap<String, RwLock<HashMap<String, IndexEntry>>>,
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            indices: DashMap::new(),
        }
    }

    /// Store `value` under `key`, expiring after `ttl` (or never, when None).
    pub fn put_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> anyhow::Result<()> {
        let value = serde_json::to_value(value)?;
        let expires_at = ttl.map(|ttl| Utc::now() + ttl);
        trace!(key, ?expires_at, "registry put");
        self.records.insert(key.to_string(), Record { value, expires_at });
        Ok(())
    }

    /// Read and deserialize the record under `key`, if present and fresh.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Utc::now();
        if let Some(record) = self.records.get(key) {
            if record.is_expired(now) {
                drop(record);
                self.records.remove(key);
                return None;
            }
            return serde_json::from_value(record.value.clone()).ok();
        }
        None
    }

    /// Drop the record under `key` regardless of freshness.
    pub fn invalidate(&self, key: &str) {
        self.records.remove(key);
    }

    /// Add or replace `member` in the sorted index `index`.
    pub fn index_put(&self, index: &str, member: &str, score: u128, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Utc::now() + ttl);
        let slot = self
            .indices
            .entry(index.to_string())
            .or_insert_with(|| RwLock::new(HashMap::new()));
        slot.write()
            .insert(member.to_string(), IndexEntry { score, expires_at });
    }

    /// Remove `member` from the sorted index `index`.
    pub fn index_remove(&self, index: &str, member: &str) {
        if let Some(slot) = self.indices.get(index) {
            slot.write().remove(member);
        }
    }

    /// Read the full index in ascending score order, skipping stale members.
    pub fn index_range(&self, index: &str) -> Vec<ScoredMember> {
        let now = Utc::now();
        let Some(slot) = self.indices.get(index) else {
            return Vec::new();
        };
        let mut members: Vec<ScoredMember> = {
            let mut guard = slot.write();
            guard.retain(|_, entry| !matches!(entry.expires_at, Some(at) if at <= now));
            guard
                .iter()
                .map(|(member, entry)| ScoredMember {
                    member: member.clone(),
                    score: entry.score,
                })
                .collect()
        };
        members.sort_by(|a, b| a.score.cmp(&b.score).then_with(|| a.member.cmp(&b.member)));
        members
    }

    /// Drop expired records eagerly. Readers never see stale data either way;
    /// this only reclaims memory on long-running nodes.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        before - self.records.len()
    }
}
