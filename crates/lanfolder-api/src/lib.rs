//! LAN Folder API -- the HTTP side of a node.
//!
//! Peers fetch `GET /index` (flat JSON object path -> {ver, size}) and then
//! `GET /<path>` for each file they need. Served on TCP at the same address
//! as the UDP listener.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use lanfolder_index::IndexStore;
use lanfolder_protocol::validate_path;

/// Shared state for all handlers.
pub struct AppState {
    pub index: IndexStore,
    /// Root of the shared folder; request paths are resolved under it.
    pub shared_root: PathBuf,
}

/// Build the axum router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/index", get(index))
        .route("/*path", get(file))
        .with_state(state)
}

async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.index.snapshot().await)
}

async fn file(State(state): State<Arc<AppState>>, Path(path): Path<String>) -> Response {
    if let Err(e) = validate_path(&path) {
        tracing::debug!(path = %path, "api: rejected path: {e}");
        return (StatusCode::BAD_REQUEST, "invalid path").into_response();
    }

    // Only paths the index knows about are served.
    if state.index.get(&path).await.is_none() {
        return (StatusCode::NOT_FOUND, "not in index").into_response();
    }

    match tokio::fs::read(state.shared_root.join(&path)).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path, "api: indexed file missing from shared folder");
            (StatusCode::NOT_FOUND, "file missing").into_response()
        }
        Err(e) => {
            tracing::error!(path = %path, "api: read failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "read failed").into_response()
        }
    }
}
