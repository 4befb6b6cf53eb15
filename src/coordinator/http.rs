//! HTTP API for the coordinator
//!
//! Renter-facing:
//! - `POST /renters` register, `POST /renters/:id/heartbeat`
//!
//! Client-facing:
//! - `PUT /files/:filename` upload (`X-Shard-Count`, `X-Shardfs-TTL` in seconds)
//! - `GET /files/:filename` streamed download
//! - `DELETE /files/:filename`, `GET /files`, `GET /renters`
//! - `GET /health`, `GET /metrics`

use crate::common::{request_tracing_middleware, Error, Result, METRICS};
use crate::coordinator::control::ControlPlane;
use crate::coordinator::registry::RenterId;
use crate::coordinator::transport::ShardTransport;
use crate::coordinator::upload::{UploadOptions, MAX_TTL};
use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub const SHARD_COUNT_HEADER: &str = "x-shard-count";
pub const TTL_HEADER: &str = "x-shardfs-ttl";
pub const INTERNAL_ID_HEADER: &str = "x-shardfs-internal-id";
pub const BLAKE3_HEADER: &str = "x-shardfs-blake3";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub address: String,
    #[serde(default)]
    pub capacity_bytes: Option<u64>,
    #[serde(default)]
    pub rack: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub renter_id: u64,
    pub heartbeat_interval_ms: u64,
}

pub fn create_router<T: ShardTransport>(plane: Arc<ControlPlane<T>>) -> Router {
    let body_limit = plane.config().max_upload_size as usize;

    Router::new()
        .route("/renters", post(register::<T>).get(list_renters::<T>))
        .route("/renters/:id/heartbeat", post(heartbeat::<T>))
        .route("/files", get(list_files::<T>))
        .route(
            "/files/:filename",
            put(upload::<T>).get(download::<T>).delete(delete::<T>),
        )
        .route("/health", get(health::<T>))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn(request_tracing_middleware))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(plane)
}

async fn register<T: ShardTransport>(
    State(plane): State<Arc<ControlPlane<T>>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    let info = plane.register(&req.address, req.capacity_bytes, req.rack)?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            renter_id: info.id.0,
            heartbeat_interval_ms: plane.config().heartbeat_interval_ms,
        }),
    ))
}

async fn heartbeat<T: ShardTransport>(
    State(plane): State<Arc<ControlPlane<T>>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse> {
    plane.heartbeat(RenterId(id))?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn list_renters<T: ShardTransport>(
    State(plane): State<Arc<ControlPlane<T>>>,
) -> impl IntoResponse {
    Json(plane.list_renters())
}

async fn list_files<T: ShardTransport>(
    State(plane): State<Arc<ControlPlane<T>>>,
) -> impl IntoResponse {
    Json(plane.list_files())
}

/// Read `X-Shard-Count` and `X-Shardfs-TTL`
pub fn upload_options(headers: &HeaderMap) -> Result<UploadOptions> {
    fn parse<N: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Result<Option<N>> {
        let Some(value) = headers.get(name) else {
            return Ok(None);
        };
        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .map(Some)
            .ok_or_else(|| Error::Validation(format!("invalid {} header", name)))
    }

    let shard_count = parse::<u32>(headers, SHARD_COUNT_HEADER)?;
    let ttl = match parse::<u64>(headers, TTL_HEADER)? {
        Some(0) => return Err(Error::Validation("TTL must be at least one second".into())),
        Some(secs) if secs > MAX_TTL.as_secs() => {
            return Err(Error::Validation(format!(
                "TTL must be at most {} seconds",
                MAX_TTL.as_secs()
            )))
        }
        Some(secs) => Some(Duration::from_secs(secs)),
        None => None,
    };
    Ok(UploadOptions { shard_count, ttl })
}

async fn upload<T: ShardTransport>(
    State(plane): State<Arc<ControlPlane<T>>>,
    Path(filename): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let options = upload_options(&headers)?;
    let summary = plane.upload(&filename, body, options).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn download<T: ShardTransport>(
    State(plane): State<Arc<ControlPlane<T>>>,
    Path(filename): Path<String>,
) -> Result<Response> {
    let download = plane.download(&filename)?;
    let summary = download.summary;

    let mut response = Body::from_stream(download.stream).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(summary.size_bytes));
    if let Ok(v) = HeaderValue::from_str(&summary.internal_id) {
        headers.insert(INTERNAL_ID_HEADER, v);
    }
    if let Ok(v) = HeaderValue::from_str(&summary.blake3) {
        headers.insert(BLAKE3_HEADER, v);
    }
    Ok(response)
}

async fn delete<T: ShardTransport>(
    State(plane): State<Arc<ControlPlane<T>>>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse> {
    let outcome = plane.delete(&filename).await?;
    Ok(Json(outcome))
}

async fn health<T: ShardTransport>(State(plane): State<Arc<ControlPlane<T>>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "active_renters": plane.list_active().len(),
        "files": plane.files().len(),
        "replication_factor": plane.config().replication_factor,
    }))
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        METRICS.to_prometheus(),
    )
}
