//! Scheduled signing-key rotation.
//!
//! One replica rotates at a time: each run takes the `jwt:rotation` lock
//! (60 s TTL) before generating a key and skips the run entirely when the
//! lock is contended. Generation failures are retried up to a bounded number
//! of attempts within the run, then left for the next scheduled run.

use chrono::Utc;
use filegrid_core::RotationConfig;
use filegrid_registry::LockRegistry;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::keys::KeyManager;

const ROTATION_LOCK: &str = "jwt:rotation";

/// Background job rotating signing keys on a fixed interval.
pub struct RotationJob {
    keys: Arc<KeyManager>,
    locks: Arc<LockRegistry>,
    config: RotationConfig,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RotationJob {
    pub fn new(keys: Arc<KeyManager>, locks: Arc<LockRegistry>, config: RotationConfig) -> Self {
        Self {
            keys,
            locks,
            config,
            handle: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let keys = Arc::clone(&self.keys);
        let locks = Arc::clone(&self.locks);
        let config = self.config.clone();
        let task = tokio::spawn(async move {
            let period = std::time::Duration::from_secs(config.interval_hours * 3600);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; the bootstrap key is fresh,
            // so skip it and rotate on schedule from then on.
            interval.tick().await;
            loop {
                interval.tick().await;
                run_once(&keys, &locks, &config).await;
            }
        });
        *self.handle.lock() = Some(task);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    /// Execute a single rotation attempt now, honoring the distributed lock.
    /// Exposed for operator-triggered rotation.
    pub async fn rotate_now(&self) -> bool {
        run_once(&self.keys, &self.locks, &self.config).await
    }
}

async fn run_once(keys: &Arc<KeyManager>, locks: &Arc<LockRegistry>, config: &RotationConfig) -> bool {
    let ttl = chrono::Duration::seconds(config.lock_ttl_secs as i64);
    let Some(token) = locks.try_acquire(ROTATION_LOCK, ttl) else {
        info!("rotation lock held elsewhere; skipping this run");
        return false;
    };

    let mut rotated = false;
    for attempt in 1..=config.max_retries {
        match keys.rotate(Utc::now()) {
            Ok(version) => {
                info!(%version, attempt, "key rotation succeeded");
                rotated = true;
                break;
            }
            Err(err) => {
                warn!(attempt, error = %err, "key rotation attempt failed");
            }
        }
    }
    if !rotated {
        warn!(
            attempts = config.max_retries,
            "key rotation exhausted retries; will retry at next scheduled run"
        );
    }
    locks.release(ROTATION_LOCK, token);
    rotated
}
