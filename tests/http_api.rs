//! Coordinator HTTP API driven through the router

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{payload, plane, register_renters};
use serde::de::DeserializeOwned;
use shardfs::common::REQUEST_ID_HEADER;
use shardfs::coordinator::http::{
    create_router, RegisterResponse, BLAKE3_HEADER, INTERNAL_ID_HEADER, SHARD_COUNT_HEADER,
    TTL_HEADER,
};
use shardfs::coordinator::{DeleteOutcome, FileStatus, FileSummary, RenterView};
use std::time::Duration;
use tokio::time::Instant;
use tower::ServiceExt;

async fn send(app: &Router, request: Request<Body>) -> axum::response::Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

async fn json<T: DeserializeOwned>(response: axum::response::Response) -> T {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_register_and_heartbeat() {
    let plane = plane(1);
    let app = create_router(plane.clone());

    let response = send(
        &app,
        Request::post("/renters")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"address":"http://10.0.0.7:8001/","capacity_bytes":1048576,"rack":4}"#,
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let registered: RegisterResponse = json(response).await;
    assert_eq!(registered.renter_id, 1);
    assert_eq!(registered.heartbeat_interval_ms, 100);

    let response = send(
        &app,
        Request::post("/renters/1/heartbeat")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &app,
        Request::post("/renters/7/heartbeat")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error: serde_json::Value = json(response).await;
    assert_eq!(error["error"], "not_found");

    let renters: Vec<RenterView> = json(send(&app, get("/renters")).await).await;
    assert_eq!(renters.len(), 1);
    assert_eq!(renters[0].info.address, "http://10.0.0.7:8001");
    assert_eq!(renters[0].info.capacity_bytes, Some(1_048_576));
    assert_eq!(renters[0].info.rack, 4);
}

#[tokio::test]
async fn test_register_rejects_empty_address() {
    let app = create_router(plane(1));

    let response = send(
        &app,
        Request::post("/renters")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"address":"  "}"#))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_file_lifecycle() {
    let plane = plane(1);
    register_renters(&plane, 2);
    let app = create_router(plane.clone());
    let data = payload(30_000);

    let response = send(
        &app,
        Request::put("/files/reports%2Fq3.pdf")
            .header(SHARD_COUNT_HEADER, "3")
            .body(Body::from(data.clone()))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let summary: FileSummary = json(response).await;
    assert_eq!(summary.filename, "reports/q3.pdf");
    assert_eq!(summary.shard_count, 3);
    assert_eq!(summary.size_bytes, 30_000);

    let response = send(&app, get("/files/reports%2Fq3.pdf")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_LENGTH], "30000");
    assert_eq!(headers[INTERNAL_ID_HEADER], summary.internal_id.as_str());
    assert_eq!(headers[BLAKE3_HEADER], summary.blake3.as_str());
    assert!(headers.contains_key(REQUEST_ID_HEADER));
    assert_eq!(body_bytes(response).await, data);

    let files: Vec<FileSummary> = json(send(&app, get("/files")).await).await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].status, FileStatus::Committed);

    let response = send(
        &app,
        Request::delete("/files/reports%2Fq3.pdf")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome: DeleteOutcome = json(response).await;
    assert_eq!(outcome.uploads_removed, 1);
    assert_eq!(outcome.shards_deleted, 3);

    let response = send(&app, get("/files/reports%2Fq3.pdf")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_errors() {
    let plane = plane(1);
    let app = create_router(plane.clone());

    let response = send(
        &app,
        Request::put("/files/a.txt")
            .body(Body::from("hello"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let error: serde_json::Value = json(response).await;
    assert_eq!(error["error"], "no_renters_available");

    register_renters(&plane, 1);

    let response = send(
        &app,
        Request::put("/files/a.txt")
            .header(TTL_HEADER, "0")
            .body(Body::from("hello"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        Request::put("/files/a.txt")
            .header(SHARD_COUNT_HEADER, "many")
            .body(Body::from("hello"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: serde_json::Value = json(response).await;
    assert_eq!(error["error"], "validation");

    assert!(plane.list_files().is_empty());
}

#[tokio::test]
async fn test_upload_with_ttl_header() {
    let plane = plane(1);
    register_renters(&plane, 1);
    let app = create_router(plane.clone());

    let response = send(
        &app,
        Request::put("/files/short-lived")
            .header(TTL_HEADER, "600")
            .body(Body::from("soon gone"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let summary: FileSummary = json(response).await;
    assert_eq!(summary.expires_at, Some(summary.upload_time + 600_000));
}

#[tokio::test]
async fn test_degraded_download_is_unavailable() {
    let plane = plane(1);
    let renters = register_renters(&plane, 2);
    plane
        .upload("fragile.bin", payload(3_000), Default::default())
        .await
        .unwrap();

    let later = Instant::now() + Duration::from_secs(5);
    plane.registry().heartbeat_at(renters[0].id, later).unwrap();
    plane.run_maintenance_at(later).await;

    let app = create_router(plane.clone());
    let response = send(&app, get("/files/fragile.bin")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let error: serde_json::Value = json(response).await;
    assert_eq!(error["error"], "shard_unavailable");

    let files: Vec<FileSummary> = json(send(&app, get("/files")).await).await;
    assert_eq!(files[0].status, FileStatus::Degraded);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let plane = plane(2);
    register_renters(&plane, 3);
    let app = create_router(plane.clone());

    let response = send(&app, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let health: serde_json::Value = json(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["active_renters"], 3);
    assert_eq!(health["replication_factor"], 2);

    let response = send(&app, get("/metrics")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert!(text.contains("shardfs_uploads_total"));
    assert!(text.contains("shardfs_endpoint_requests_total{path=\"/health\"}"));
}
