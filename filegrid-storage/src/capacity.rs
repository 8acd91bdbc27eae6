//! Capacity accounting for a storage element.
//!
//! The element tracks its own used bytes (adjusted on every write and
//! delete, recomputed from the catalog at startup) against a configured
//! capacity. The capacity monitor polls the snapshot; the selector reads the
//! published record.

use chrono::{DateTime, Utc};
use filegrid_core::{ElementHealth, StorageMode, StorageType};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time usage numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub percent_used: f64,
}

/// Body of the element's capacity endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityReport {
    pub storage_id: String,
    pub mode: StorageMode,
    pub capacity: CapacitySnapshot,
    pub health: ElementHealth,
    pub last_update: DateTime<Utc>,
    pub backend: StorageType,
    pub location: String,
}

/// Lock-free used-bytes counter against a fixed capacity.
pub struct CapacityCalculator {
    capacity_bytes: u64,
    used: AtomicU64,
}

impl CapacityCalculator {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes,
            used: AtomicU64::new(0),
        }
    }

    pub fn set_used(&self, used: u64) {
        self.used.store(used, Ordering::SeqCst);
    }

    pub fn add(&self, bytes: u64) {
        self.used.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn sub(&self, bytes: u64) {
        let mut current = self.used.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_sub(bytes);
            match self
                .used
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn snapshot(&self) -> CapacitySnapshot {
        let used = self.used.load(Ordering::SeqCst);
        let total = self.capacity_bytes;
        let available = total.saturating_sub(used);
        let percent_used = if total == 0 {
            100.0
        } else {
            (used as f64 / total as f64) * 100.0
        };
        CapacitySnapshot {
            total,
            used,
            available,
            percent_used,
        }
    }

    /// Health as reported by the element itself, from fill level alone.
    /// Reachability-based health is layered on by the capacity monitor.
    pub fn health(&self) -> ElementHealth {
        let percent = self.snapshot().percent_used;
        if percent >= 95.0 {
            ElementHealth::Unhealthy
        } else if percent >= 85.0 {
            ElementHealth::Degraded
        } else {
            ElementHealth::Healthy
        }
    }

    pub fn available(&self) -> u64 {
        self.snapshot().available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_arithmetic() {
        let calc = CapacityCalculator::new(1000);
        calc.add(250);
        let snap = calc.snapshot();
        assert_eq!(snap.used, 250);
        assert_eq!(snap.available, 750);
        assert!((snap.percent_used - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sub_saturates_at_zero() {
        let calc = CapacityCalculator::new(100);
        calc.add(10);
        calc.sub(50);
        assert_eq!(calc.snapshot().used, 0);
    }

    #[test]
    fn health_bands() {
        let calc = CapacityCalculator::new(100);
        assert_eq!(calc.health(), ElementHealth::Healthy);
        calc.set_used(86);
        assert_eq!(calc.health(), ElementHealth::Degraded);
        calc.set_used(96);
        assert_eq!(calc.health(), ElementHealth::Unhealthy);
    }
}
