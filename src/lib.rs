//! Filegrid node orchestration.
//!
//! Wires every subsystem together in dependency order — shared registry and
//! event bus first, then keys and tokens, storage elements, the control
//! plane, the ingest path, the query side, and finally the HTTP gateway —
//! and manages their lifecycle as one unit.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use filegrid_api::{ApiGateway, AppState};
use filegrid_core::FilegridConfig;
use filegrid_admin::AdminService;
use filegrid_ingester::{FinalizeCoordinator, StorageSelector, UploadService};
use filegrid_query::{CacheSyncService, DownloadService, MetadataCache, SearchIndex};
use filegrid_registry::{EventBus, LockRegistry, RegistryStore};
use filegrid_security::{AccountStore, KeyManager, RotationJob, TokenService};
use filegrid_storage::StorageElement;

/// One fully wired filegrid node.
pub struct FilegridNode {
    pub config: FilegridConfig,
    pub registry: Arc<RegistryStore>,
    pub locks: Arc<LockRegistry>,
    pub bus: Arc<EventBus>,
    pub keys: Arc<KeyManager>,
    pub tokens: Arc<TokenService>,
    pub accounts: Arc<AccountStore>,
    pub rotation: RotationJob,
    pub admin: AdminService,
    pub elements: Vec<Arc<StorageElement>>,
    pub selector: Arc<StorageSelector>,
    pub upload: Arc<UploadService>,
    pub finalize: Arc<FinalizeCoordinator>,
    pub index: Arc<SearchIndex>,
    pub sync: Arc<CacheSyncService>,
    pub download: Arc<DownloadService>,
    pub api: ApiGateway,
}

impl FilegridNode {
    pub async fn new(config: FilegridConfig) -> Result<Self> {
        info!(node = %config.node.name, "initializing filegrid node");

        let registry = Arc::new(RegistryStore::new());
        let locks = Arc::new(LockRegistry::new());
        let bus = Arc::new(EventBus::new());

        let key_lifetime =
            chrono::Duration::hours((config.rotation.interval_hours + config.rotation.overlap_hours) as i64);
        let keys = KeyManager::load(config.node.data_dir.join("keys"), key_lifetime)
            .context("signing key initialization failed")?;
        let tokens = Arc::new(TokenService::new(Arc::clone(&keys), config.tokens.clone()));
        let rotation = RotationJob::new(Arc::clone(&keys), Arc::clone(&locks), config.rotation.clone());

        let db = sled::open(config.node.data_dir.join("admin-db"))
            .context("failed to open control-plane store")?;
        let accounts = Arc::new(AccountStore::open(&db, config.lockout.clone())?);

        let admin = AdminService::new(
            &db,
            Arc::clone(&bus),
            Arc::clone(&registry),
            Arc::clone(&locks),
            config.capacity.clone(),
            config.gc.clone(),
            config.health.clone(),
        )?;

        let mut elements = Vec::with_capacity(config.elements.len());
        for element_config in &config.elements {
            let element =
                StorageElement::open(element_config.clone(), config.upload.max_file_size).await?;
            admin.directory.register(Arc::clone(&element));
            elements.push(element);
        }

        let selector = Arc::new(StorageSelector::new(
            Arc::clone(&registry),
            Arc::clone(&admin.directory),
            config.elements.clone(),
            config.selector.clone(),
        ));
        let upload = Arc::new(UploadService::new(
            Arc::clone(&selector),
            Arc::clone(&admin.directory),
            Arc::clone(&admin.files),
            config.upload.clone(),
        ));
        let finalize = FinalizeCoordinator::new(
            Arc::clone(&admin.files),
            Arc::clone(&admin.transactions),
            Arc::clone(&admin.cleanup),
            Arc::clone(&selector),
            Arc::clone(&admin.directory),
            config.finalize.clone(),
        );

        let index = Arc::new(SearchIndex::new());
        let sync = CacheSyncService::new(
            Arc::clone(&bus),
            Arc::clone(&index),
            Arc::clone(&admin.files),
            config.query.clone(),
        );
        let cache = Arc::new(MetadataCache::new(
            Arc::clone(&registry),
            Arc::clone(&admin.files),
            config.query.clone(),
        ));
        let download = Arc::new(DownloadService::new(cache, Arc::clone(&admin.directory)));

        let state = AppState {
            tokens: Arc::clone(&tokens),
            accounts: Arc::clone(&accounts),
            upload: Arc::clone(&upload),
            finalize: Arc::clone(&finalize),
            download: Arc::clone(&download),
            index: Arc::clone(&index),
            sync: Arc::clone(&sync),
            directory: Arc::clone(&admin.directory),
            health: Arc::clone(&admin.health),
            audit: Arc::clone(&admin.audit),
            max_upload_bytes: config.upload.max_file_size as usize,
        };
        let api = ApiGateway::new(config.api.clone(), state);

        Ok(Self {
            config,
            registry,
            locks,
            bus,
            keys,
            tokens,
            accounts,
            rotation,
            admin,
            elements,
            selector,
            upload,
            finalize,
            index,
            sync,
            download,
            api,
        })
    }

    pub async fn start(&self) -> Result<()> {
        // Subscribers come up before producers so no event is published into
        // an empty bus at boot.
        self.sync.start();
        for element in &self.elements {
            element.start().await?;
        }
        self.admin.start();
        self.keys.watch()?;
        self.rotation.start();
        self.finalize.start();
        self.api.start().await?;
        info!(node = %self.config.node.name, "filegrid node started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.api.stop().await?;
        self.finalize.stop();
        self.rotation.stop();
        self.keys.stop();
        self.admin.stop();
        for element in &self.elements {
            element.stop().await?;
        }
        self.sync.stop();
        info!(node = %self.config.node.name, "filegrid node stopped");
        Ok(())
    }
}
