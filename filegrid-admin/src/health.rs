//! Health aggregation.
//!
//! A background task refreshes a cached health snapshot every few seconds;
//! the readiness endpoint reads only the cache, so probes cost microseconds
//! and never perform I/O themselves. Liveness is unconditional while the
//! process runs.

use chrono::{DateTime, Utc};
use filegrid_core::HealthConfig;
use filegrid_registry::EventBus;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::elements::ElementDirectory;
use crate::files::FileRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Fail,
}

/// Cached health snapshot served by `/health/ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthState {
    pub status: HealthStatus,
    pub checks: BTreeMap<String, bool>,
    pub summary: Option<String>,
    pub refreshed_at: DateTime<Utc>,
}

impl HealthState {
    fn initial() -> Self {
        Self {
            status: HealthStatus::Fail,
            checks: BTreeMap::new(),
            summary: Some("not yet refreshed".into()),
            refreshed_at: Utc::now(),
        }
    }
}

pub struct HealthAggregator {
    files: Arc<FileRegistry>,
    bus: Arc<EventBus>,
    directory: Arc<ElementDirectory>,
    state: Arc<RwLock<HealthState>>,
    config: HealthConfig,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthAggregator {
    pub fn new(
        files: Arc<FileRegistry>,
        bus: Arc<EventBus>,
        directory: Arc<ElementDirectory>,
        config: HealthConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            files,
            bus,
            directory,
            state: Arc::new(RwLock::new(HealthState::initial())),
            config,
            handle: Mutex::new(None),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let aggregator = Arc::clone(self);
        let period = std::time::Duration::from_secs(self.config.refresh_interval_secs);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                aggregator.refresh();
            }
        });
        *self.handle.lock() = Some(task);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    /// Recompute the cached state. The database check is the critical one;
    /// event-bus subscribers and element presence only degrade.
    pub fn refresh(&self) {
        let mut checks = BTreeMap::new();
        let database = self.files.ping();
        checks.insert("database".into(), database);

        let event_bus = self.bus.subscriber_count() > 0;
        checks.insert("event_bus".into(), event_bus);

        let storage_elements = !self.directory.is_empty();
        checks.insert("storage_elements".into(), storage_elements);

        let (status, summary) = if !database {
            (HealthStatus::Fail, Some("database unreachable".to_string()))
        } else if !event_bus || !storage_elements {
            let mut down = Vec::new();
            if !event_bus {
                down.push("event_bus has no subscribers");
            }
            if !storage_elements {
                down.push("no storage elements registered");
            }
            (HealthStatus::Degraded, Some(down.join("; ")))
        } else {
            (HealthStatus::Ok, None)
        };

        *self.state.write() = HealthState {
            status,
            checks,
            summary,
            refreshed_at: Utc::now(),
        };
    }

    /// Readiness: cached state only, no I/O.
    pub fn ready(&self) -> HealthState {
        self.state.read().clone()
    }

    /// Liveness: true for as long as the process runs.
    pub fn live(&self) -> bool {
        true
    }
}
