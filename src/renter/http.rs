//! Renter HTTP API
//!
//! - `PUT /shards/:internal_id/:index` store (body is the shard)
//! - `GET /shards/:internal_id/:index` fetch
//! - `DELETE /shards/:internal_id/:index` delete (404 when absent)
//! - `GET /health`

use crate::common::{Error, Result};
use crate::renter::store::ShardStore;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct RenterState {
    pub store: Arc<ShardStore>,
    /// Id assigned by the coordinator, 0 until registered
    pub renter_id: Arc<AtomicU64>,
}

pub fn create_router(state: RenterState, max_shard_body: usize) -> Router {
    Router::new()
        .route(
            "/shards/:internal_id/:index",
            put(store_shard).get(fetch_shard).delete(delete_shard),
        )
        .route("/health", get(health))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_shard_body))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run blocking store I/O off the async workers
async fn blocking<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("store task failed: {}", e)))?
}

async fn store_shard(
    State(state): State<RenterState>,
    Path((internal_id, index)): Path<(String, u32)>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let store = state.store.clone();
    let len = body.len();
    blocking(move || store.put(&internal_id, index, &body)).await?;
    Ok((StatusCode::CREATED, Json(json!({ "stored": len }))))
}

async fn fetch_shard(
    State(state): State<RenterState>,
    Path((internal_id, index)): Path<(String, u32)>,
) -> Result<impl IntoResponse> {
    let store = state.store.clone();
    let key = format!("{}#{}", internal_id, index);
    let data = blocking(move || store.get(&internal_id, index))
        .await?
        .ok_or_else(|| Error::NotFound(format!("shard {}", key)))?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    ))
}

async fn delete_shard(
    State(state): State<RenterState>,
    Path((internal_id, index)): Path<(String, u32)>,
) -> Result<impl IntoResponse> {
    let store = state.store.clone();
    let key = format!("{}#{}", internal_id, index);
    if blocking(move || store.delete(&internal_id, index)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(Error::NotFound(format!("shard {}", key)))
    }
}

async fn health(State(state): State<RenterState>) -> impl IntoResponse {
    let id = state.renter_id.load(Ordering::SeqCst);
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "renter_id": if id == 0 { None } else { Some(id) },
        "store": state.store.stats(),
    }))
}
