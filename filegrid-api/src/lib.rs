//! # Filegrid API Gateway
//!
//! The HTTP surface over the service crates: the OAuth token endpoint,
//! multipart upload, two-phase finalize with status polling, ranged
//! download, search, element discovery/capacity/mode, and health probes.
//! One middleware validates bearer tokens; one translation layer maps
//! domain error kinds to status codes.

mod auth;
mod download;
mod element;
mod errors;
mod finalize;
mod health;
mod middleware;
mod search;
mod upload;

pub use errors::ApiError;
pub use middleware::AuthContext;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::Router;
use filegrid_core::ApiConfig;
use filegrid_admin::{AuditTrail, ElementDirectory, HealthAggregator};
use filegrid_ingester::{FinalizeCoordinator, UploadService};
use filegrid_query::{CacheSyncService, DownloadService, SearchIndex};
use filegrid_security::{AccountStore, TokenService};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared handler state: one `Arc` per service.
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub accounts: Arc<AccountStore>,
    pub upload: Arc<UploadService>,
    pub finalize: Arc<FinalizeCoordinator>,
    pub download: Arc<DownloadService>,
    pub index: Arc<SearchIndex>,
    pub sync: Arc<CacheSyncService>,
    pub directory: Arc<ElementDirectory>,
    pub health: Arc<HealthAggregator>,
    pub audit: Arc<AuditTrail>,
    pub max_upload_bytes: usize,
}

/// HTTP gateway bound to one address, serving every external interface.
pub struct ApiGateway {
    config: ApiConfig,
    state: AppState,
    shutdown: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ApiGateway {
    pub fn new(config: ApiConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            shutdown: parking_lot::Mutex::new(None),
        }
    }

    /// Assemble the router. Public routes: health probes, the token
    /// endpoint, element discovery and capacity. Everything else sits
    /// behind the bearer middleware.
    pub fn router(state: AppState) -> Router {
        let protected = Router::new()
            .route("/api/v1/upload", post(upload::upload))
            .route("/api/v1/finalize/:file_id", post(finalize::start))
            .route(
                "/api/v1/finalize/:transaction_id/status",
                get(finalize::status),
            )
            .route("/api/download/:file_id", get(download::download))
            .route("/api/search", post(search::search))
            .route("/api/v1/cache/rebuild", post(search::rebuild))
            .route("/api/v1/elements", get(element::list))
            .route("/api/v1/elements/:element_id/mode", get(element::mode))
            .route(
                "/api/v1/elements/:element_id/mode",
                put(element::transition_mode),
            )
            .route(
                "/api/v1/elements/:element_id/files/:file_id",
                delete(element::delete_file),
            )
            .route(
                "/api/v1/elements/:element_id/gc/:file_id",
                delete(element::gc_delete_file),
            )
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                middleware::require_bearer,
            ));

        Router::new()
            .route("/health/live", get(health::live))
            .route("/health/ready", get(health::ready))
            .route("/api/v1/auth/token", post(auth::token))
            .route("/api/v1/elements/:element_id/info", get(element::info))
            .route(
                "/api/v1/elements/:element_id/capacity",
                get(element::capacity),
            )
            .merge(protected)
            .layer(DefaultBodyLimit::max(state.max_upload_bytes + 1024 * 1024))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    pub async fn start(&self) -> Result<()> {
        let app = Self::router(self.state.clone());
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(%addr, "API gateway listening");
        let server = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                warn!(error = %err, "API gateway server error");
            }
        });
        *self.shutdown.lock() = Some(server);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        if let Some(handle) = self.shutdown.lock().take() {
            handle.abort();
        }
        info!("API gateway stopped");
        Ok(())
    }
}
