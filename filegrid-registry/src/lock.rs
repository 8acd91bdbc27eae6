//! Distributed locks with lease semantics and leader election.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct LockEntry {
    owner: Uuid,
    expires_at: DateTime<Utc>,
}

/// Opaque proof of lock ownership. Renew and release require the token, so a
/// holder whose lease lapsed cannot stomp on the next owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockToken {
    owner: Uuid,
}

/// TTL'd, non-reentrant lock table.
///
/// Locks are acquired for a bounded lease and silently lapse when not
/// renewed. This protects against double rotation and split-brain polling
/// even when a holder crashes without releasing.
pub struct LockRegistry {
    locks: DashMap<String, LockEntry>,
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Try to take `name` for `ttl`. Returns None when a fresh lease exists.
    pub fn try_acquire(&self, name: &str, ttl: Duration) -> Option<LockToken> {
        use dashmap::mapref::entry::Entry;

        let now = Utc::now();
        let owner = Uuid::new_v4();
        let acquired = match self.locks.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.expires_at <= now {
                    entry.owner = owner;
                    entry.expires_at = now + ttl;
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LockEntry {
                    owner,
                    expires_at: now + ttl,
                });
                true
            }
        };
        if acquired {
            debug!(lock = name, %owner, "lock acquired");
            Some(LockToken { owner })
        } else {
            None
        }
    }

    /// Extend the lease. Fails when the lease lapsed or was taken over.
    pub fn renew(&self, name: &str, token: LockToken, ttl: Duration) -> bool {
        let now = Utc::now();
        if let Some(mut entry) = self.locks.get_mut(name) {
            if entry.owner == token.owner && entry.expires_at > now {
                entry.expires_at = now + ttl;
                return true;
            }
        }
        false
    }

    /// Release the lock if still owned by `token`.
    pub fn release(&self, name: &str, token: LockToken) -> bool {
        if let Some(entry) = self.locks.get(name) {
            if entry.owner != token.owner {
                return false;
            }
        } else {
            return false;
        }
        self.locks
            .remove_if(name, |_, entry| entry.owner == token.owner)
            .is_some()
    }

    /// Whether a fresh lease currently exists for `name`.
    pub fn is_held(&self, name: &str) -> bool {
        let now = Utc::now();
        self.locks
            .get(name)
            .map(|entry| entry.expires_at > now)
            .unwrap_or(false)
    }
}

/// Leader lease built on [`LockRegistry`]: one holder cluster-wide, renewed
/// by heartbeat, surrendered the moment renewal fails.
pub struct LeaderLease {
    locks: Arc<LockRegistry>,
    name: String,
    ttl: Duration,
    heartbeat: std::time::Duration,
    is_leader: Arc<AtomicBool>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl LeaderLease {
    pub fn new(
        locks: Arc<LockRegistry>,
        name: impl Into<String>,
        ttl: Duration,
        heartbeat: std::time::Duration,
    ) -> Self {
        Self {
            locks,
            name: name.into(),
            ttl,
            heartbeat,
            is_leader: Arc::new(AtomicBool::new(false)),
            handle: parking_lot::Mutex::new(None),
        }
    }

    /// Begin competing for leadership.
    pub fn start(&self) {
        let locks = Arc::clone(&self.locks);
        let name = self.name.clone();
        let ttl = self.ttl;
        let heartbeat = self.heartbeat;
        let is_leader = Arc::clone(&self.is_leader);

        let task = tokio::spawn(async move {
            let mut token: Option<LockToken> = None;
            let mut interval = tokio::time::interval(heartbeat);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match token {
                    Some(current) => {
                        if !locks.renew(&name, current, ttl) {
                            warn!(lease = %name, "leader lease lost");
                            token = None;
                            is_leader.store(false, Ordering::SeqCst);
                        }
                    }
                    None => {
                        if let Some(acquired) = locks.try_acquire(&name, ttl) {
                            info!(lease = %name, "leadership acquired");
                            token = Some(acquired);
                            is_leader.store(true, Ordering::SeqCst);
                        }
                    }
                }
            }
        });
        *self.handle.lock() = Some(task);
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Stop heartbeating. The lease lapses on its own after the TTL.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
        self.is_leader.store(false, Ordering::SeqCst);
    }
}
