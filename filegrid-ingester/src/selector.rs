//! Storage element selection.
//!
//! Given a retention policy and a file size, produce an ordered candidate
//! list. The fast path is one range read of the mode's sorted capacity index
//! in the shared registry. When the registry has gone stale (no index
//! members at all), selection falls back to the admin element directory, and
//! past that to the static element list from configuration.
//!
//! Candidates that lack headroom (`available < size * safety_margin`) or are
//! not healthy are skipped. A candidate is tried once; when an element
//! answers with insufficient-space, the caller invalidates its capacity
//! entry and moves to the next candidate.

use filegrid_core::{
    CapacityRecord, ElementConfig, ElementHealth, ElementStatus, RetentionPolicy, SelectorConfig,
    StorageMode,
};
use filegrid_registry::{capacity_key, RegistryStore, INDEX_CAPACITY_EDIT, INDEX_CAPACITY_RW};
use filegrid_admin::ElementDirectory;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::IngestError;

pub struct StorageSelector {
    registry: Arc<RegistryStore>,
    directory: Arc<ElementDirectory>,
    static_fallback: Vec<ElementConfig>,
    config: SelectorConfig,
}

impl StorageSelector {
    pub fn new(
        registry: Arc<RegistryStore>,
        directory: Arc<ElementDirectory>,
        static_fallback: Vec<ElementConfig>,
        config: SelectorConfig,
    ) -> Self {
        Self {
            registry,
            directory,
            static_fallback,
            config,
        }
    }

    /// Ordered element ids able to take a file of `file_size` bytes under
    /// `retention`. At most `max_retries` candidates are returned.
    pub fn select(
        &self,
        retention: RetentionPolicy,
        file_size: u64,
    ) -> Result<Vec<String>, IngestError> {
        let mode = retention.required_mode();
        let required = self.required_bytes(file_size);

        let index = index_for(mode);
        let members = self.registry.index_range(index);
        if members.is_empty() {
            debug!(%mode, "capacity index empty; falling back past the registry");
            return self.select_fallback(mode, required);
        }

        let mut candidates = Vec::new();
        for member in members {
            let Some(record) = self
                .registry
                .get_json::<CapacityRecord>(&capacity_key(&member.member))
            else {
                continue;
            };
            if record.health != ElementHealth::Healthy {
                debug!(element = %member.member, health = ?record.health, "skipping unhealthy candidate");
                continue;
            }
            if record.available < required {
                continue;
            }
            candidates.push(member.member);
            if candidates.len() as u32 >= self.config.max_retries {
                break;
            }
        }

        if candidates.is_empty() {
            return Err(IngestError::NoAvailableStorage);
        }
        Ok(candidates)
    }

    /// Drop the element's capacity entry so the next selection sees a fresh
    /// poll rather than the optimistic record that just produced a 507.
    pub fn invalidate_candidate(&self, element_id: &str) {
        warn!(element = element_id, "invalidating capacity entry after insufficient-space answer");
        self.registry.invalidate(&capacity_key(element_id));
        self.registry.index_remove(INDEX_CAPACITY_EDIT, element_id);
        self.registry.index_remove(INDEX_CAPACITY_RW, element_id);
    }

    fn select_fallback(&self, mode: StorageMode, required: u64) -> Result<Vec<String>, IngestError> {
        // Second tier: ask the admin directory directly.
        let mut registrations: Vec<_> = self
            .directory
            .registrations()
            .into_iter()
            .filter(|registration| {
                registration.mode == mode
                    && registration.status == ElementStatus::Online
                    && registration.capacity_bytes.saturating_sub(registration.used_bytes) >= required
            })
            .collect();
        registrations.sort_by_key(|registration| registration.priority);
        if !registrations.is_empty() {
            return Ok(registrations
                .into_iter()
                .map(|registration| registration.element_id)
                .take(self.config.max_retries as usize)
                .collect());
        }

        // Last resort: the static list from configuration. Capacity there is
        // declared, not observed, so only the mode gates membership.
        let mut statics: Vec<_> = self
            .static_fallback
            .iter()
            .filter(|element| element.mode == mode)
            .collect();
        statics.sort_by_key(|element| element.priority);
        let candidates: Vec<String> = statics
            .into_iter()
            .map(|element| element.element_id.clone())
            .take(self.config.max_retries as usize)
            .collect();

        if candidates.is_empty() {
            Err(IngestError::NoAvailableStorage)
        } else {
            warn!(%mode, "selector served candidates from the static fallback list");
            Ok(candidates)
        }
    }

    fn required_bytes(&self, file_size: u64) -> u64 {
        (file_size as f64 * self.config.safety_margin).ceil() as u64
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

fn index_for(mode: StorageMode) -> &'static str {
    match mode {
        StorageMode::Edit => INDEX_CAPACITY_EDIT,
        _ => INDEX_CAPACITY_RW,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(element_id: &str, available: u64, health: ElementHealth, mode: StorageMode) -> CapacityRecord {
        CapacityRecord {
            element_id: element_id.into(),
            total: 1_000_000,
            used: 1_000_000 - available,
            available,
            percent_used: 0.0,
            health,
            mode,
            endpoint: format!("http://{element_id}"),
            last_poll: Utc::now(),
        }
    }

    fn publish(registry: &RegistryStore, rec: &CapacityRecord, priority: u32) {
        registry
            .put_json(&capacity_key(&rec.element_id), rec, Some(Duration::seconds(120)))
            .unwrap();
        let index = index_for(rec.mode);
        registry.index_put(index, &rec.element_id, rec.index_score(priority), Some(Duration::seconds(120)));
    }

    fn selector(registry: Arc<RegistryStore>, statics: Vec<ElementConfig>) -> StorageSelector {
        StorageSelector::new(
            registry,
            Arc::new(ElementDirectory::new()),
            statics,
            SelectorConfig::default(),
        )
    }

    #[test]
    fn picks_priority_order_with_headroom() {
        let registry = Arc::new(RegistryStore::new());
        publish(&registry, &record("se-b", 500_000, ElementHealth::Healthy, StorageMode::Edit), 2);
        publish(&registry, &record("se-a", 400_000, ElementHealth::Healthy, StorageMode::Edit), 1);
        let selector = selector(Arc::clone(&registry), vec![]);

        let candidates = selector.select(RetentionPolicy::Temporary, 1000).unwrap();
        assert_eq!(candidates[0], "se-a");
        assert!(candidates.contains(&"se-b".to_string()));
    }

    #[test]
    fn skips_unhealthy_and_tight_candidates() {
        let registry = Arc::new(RegistryStore::new());
        publish(&registry, &record("se-sick", 500_000, ElementHealth::Degraded, StorageMode::Edit), 1);
        // 1000 * 1.1 margin > 1050 available.
        publish(&registry, &record("se-tight", 1050, ElementHealth::Healthy, StorageMode::Edit), 2);
        publish(&registry, &record("se-ok", 500_000, ElementHealth::Healthy, StorageMode::Edit), 3);
        let selector = selector(Arc::clone(&registry), vec![]);

        let candidates = selector.select(RetentionPolicy::Temporary, 1000).unwrap();
        assert_eq!(candidates, vec!["se-ok"]);
    }

    #[test]
    fn permanent_files_use_the_rw_index() {
        let registry = Arc::new(RegistryStore::new());
        publish(&registry, &record("se-edit", 500_000, ElementHealth::Healthy, StorageMode::Edit), 1);
        publish(&registry, &record("se-rw", 500_000, ElementHealth::Healthy, StorageMode::Rw), 1);
        let selector = selector(Arc::clone(&registry), vec![]);

        let candidates = selector.select(RetentionPolicy::Permanent, 1000).unwrap();
        assert_eq!(candidates, vec!["se-rw"]);
    }

    #[test]
    fn all_candidates_full_is_no_available_storage() {
        let registry = Arc::new(RegistryStore::new());
        publish(&registry, &record("se-a", 10, ElementHealth::Healthy, StorageMode::Edit), 1);
        let selector = selector(Arc::clone(&registry), vec![]);
        assert!(matches!(
            selector.select(RetentionPolicy::Temporary, 1000),
            Err(IngestError::NoAvailableStorage)
        ));
    }

    #[test]
    fn empty_registry_falls_back_to_static_list() {
        let registry = Arc::new(RegistryStore::new());
        let statics = vec![ElementConfig {
            element_id: "se-static".into(),
            display_name: "Static".into(),
            api_url: "http://se-static".into(),
            mode: StorageMode::Edit,
            storage_type: filegrid_core::StorageType::Local,
            priority: 1,
            capacity_bytes: 1_000_000,
            root: std::path::PathBuf::from("/tmp/se-static"),
            max_file_size: None,
        }];
        let selector = selector(Arc::clone(&registry), statics);
        let candidates = selector.select(RetentionPolicy::Temporary, 1000).unwrap();
        assert_eq!(candidates, vec!["se-static"]);
    }

    #[test]
    fn invalidation_removes_candidate_from_next_selection() {
        let registry = Arc::new(RegistryStore::new());
        publish(&registry, &record("se-a", 500_000, ElementHealth::Healthy, StorageMode::Edit), 1);
        publish(&registry, &record("se-b", 500_000, ElementHealth::Healthy, StorageMode::Edit), 2);
        let selector = selector(Arc::clone(&registry), vec![]);

        selector.invalidate_candidate("se-a");
        let candidates = selector.select(RetentionPolicy::Temporary, 1000).unwrap();
        assert_eq!(candidates, vec!["se-b"]);
    }
}
