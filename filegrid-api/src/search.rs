//! Search endpoint over the query service's metadata index.

use axum::extract::State;
use axum::{Extension, Json};
use filegrid_query::{SearchRequest, SearchResponse};
use tracing::debug;

use crate::errors::ApiError;
use crate::middleware::AuthContext;
use crate::AppState;

/// `POST /api/search`.
pub async fn search(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let response = state.index.search(&request);
    debug!(
        caller = %auth.display_name(),
        total = response.total_count,
        returned = response.results.len(),
        "search executed"
    );
    Ok(Json(response))
}

/// `POST /api/v1/cache/rebuild` — operator-triggered full rebuild of the
/// searchable cache from the authoritative registry.
pub async fn rebuild(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let restored = state.sync.rebuild()?;
    state
        .audit
        .record(auth.display_name(), "cache_rebuild", "search_index", "success");
    Ok(Json(serde_json::json!({ "restored": restored })))
}
