//! # Filegrid Admin (Control Plane)
//!
//! The authoritative side of the platform: the file registry and its
//! lifecycle events, finalize transaction rows, the deferred-deletion queue
//! and its GC worker, the leader-elected capacity monitor, the audit trail,
//! and the cached health aggregator.
//!
//! [`AdminService`] wires the parts together under the usual lifecycle
//! convention: construct, `start()`, `stop()`.

mod audit;
mod capacity_monitor;
mod cleanup;
mod elements;
mod errors;
mod files;
mod gc;
mod health;
mod publisher;
mod transactions;

pub use audit::{AuditEntry, AuditTrail};
pub use capacity_monitor::CapacityMonitor;
pub use cleanup::CleanupQueue;
pub use elements::ElementDirectory;
pub use errors::AdminError;
pub use files::FileRegistry;
pub use gc::GcWorker;
pub use health::{HealthAggregator, HealthState, HealthStatus};
pub use publisher::EventPublisher;
pub use transactions::TransactionStore;

use anyhow::Result;
use filegrid_core::{CapacityMonitorConfig, GcConfig, HealthConfig};
use filegrid_registry::{EventBus, LockRegistry, RegistryStore};
use std::sync::Arc;
use tracing::info;

/// The assembled control plane.
pub struct AdminService {
    pub files: Arc<FileRegistry>,
    pub transactions: Arc<TransactionStore>,
    pub cleanup: Arc<CleanupQueue>,
    pub directory: Arc<ElementDirectory>,
    pub gc: Arc<GcWorker>,
    pub monitor: Arc<CapacityMonitor>,
    pub audit: Arc<AuditTrail>,
    pub health: Arc<HealthAggregator>,
}

impl AdminService {
    pub fn new(
        db: &sled::Db,
        bus: Arc<EventBus>,
        registry: Arc<RegistryStore>,
        locks: Arc<LockRegistry>,
        capacity_config: CapacityMonitorConfig,
        gc_config: GcConfig,
        health_config: HealthConfig,
    ) -> Result<Self> {
        let publisher = EventPublisher::new(Arc::clone(&bus));
        let files = Arc::new(FileRegistry::open(db, publisher)?);
        let transactions = Arc::new(TransactionStore::open(db)?);
        let cleanup = Arc::new(CleanupQueue::open(db)?);
        let directory = Arc::new(ElementDirectory::new());
        let gc = GcWorker::new(
            Arc::clone(&cleanup),
            Arc::clone(&directory),
            Arc::clone(&files),
            gc_config,
        );
        let monitor = CapacityMonitor::new(
            Arc::clone(&directory),
            registry,
            locks,
            capacity_config,
        );
        let audit = Arc::new(AuditTrail::open(db)?);
        let health = HealthAggregator::new(
            Arc::clone(&files),
            bus,
            Arc::clone(&directory),
            health_config,
        );
        Ok(Self {
            files,
            transactions,
            cleanup,
            directory,
            gc,
            monitor,
            audit,
            health,
        })
    }

    pub fn start(&self) {
        self.audit.start();
        self.monitor.start();
        self.gc.start();
        self.health.start();
        info!("admin service started");
    }

    pub fn stop(&self) {
        self.health.stop();
        self.gc.stop();
        self.monitor.stop();
        self.audit.stop();
        info!("admin service stopped");
    }
}
