//! Renter shard API, and the whole system over real sockets

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use shardfs::common::RenterConfig;
use shardfs::coordinator::http::create_router as coordinator_router;
use shardfs::coordinator::{ControlPlane, HttpRenterClient, MetadataStore, UploadOptions};
use shardfs::renter::http::{create_router, RenterState};
use shardfs::renter::{HeartbeatAgent, ShardStore};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

fn renter_app(dir: &TempDir, capacity: Option<u64>) -> (Router, Arc<ShardStore>) {
    let store = Arc::new(ShardStore::open(dir.path(), capacity).unwrap());
    let app = create_router(
        RenterState {
            store: store.clone(),
            renter_id: Arc::new(AtomicU64::new(0)),
        },
        1024 * 1024,
    );
    (app, store)
}

async fn send(app: &Router, request: Request<Body>) -> axum::response::Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_shard_put_get_delete() {
    let dir = TempDir::new().unwrap();
    let (app, store) = renter_app(&dir, None);

    let response = send(
        &app,
        Request::put("/shards/3f2a-file/0")
            .body(Body::from("shard bytes"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(store.stats().shards, 1);

    let response = send(
        &app,
        Request::get("/shards/3f2a-file/0").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"shard bytes");

    let response = send(
        &app,
        Request::get("/shards/3f2a-file/1").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let delete = || {
        Request::delete("/shards/3f2a-file/0")
            .body(Body::empty())
            .unwrap()
    };
    assert_eq!(send(&app, delete()).await.status(), StatusCode::NO_CONTENT);
    assert_eq!(send(&app, delete()).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(store.stats().shards, 0);
}

#[tokio::test]
async fn test_shard_api_rejects_bad_input() {
    let dir = TempDir::new().unwrap();
    let (app, _store) = renter_app(&dir, Some(16));

    let response = send(
        &app,
        Request::put("/shards/..%2Fescape/0")
            .body(Body::from("x"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        Request::put("/shards/big/0")
            .body(Body::from(vec![0u8; 64]))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INSUFFICIENT_STORAGE);
}

#[tokio::test]
async fn test_end_to_end_over_http() {
    let dirs: Vec<TempDir> = (0..3).map(|_| TempDir::new().unwrap()).collect();
    let mut stores = Vec::new();
    let mut addrs = Vec::new();
    for dir in &dirs {
        let (app, store) = renter_app(dir, None);
        addrs.push(spawn_server(app).await);
        stores.push(store);
    }

    let config = shardfs::common::CoordinatorConfig {
        replication_factor: 2,
        max_shard_size: 16 * 1024,
        ..Default::default()
    };
    let plane = Arc::new(
        ControlPlane::new(
            config,
            HttpRenterClient::new(Duration::from_secs(5)).unwrap(),
            MetadataStore::temporary().unwrap(),
        )
        .unwrap(),
    );
    for addr in &addrs {
        plane.register(&format!("http://{}", addr), None, None).unwrap();
    }

    let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let summary = plane
        .upload("dataset.csv", data.clone().into(), UploadOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.shard_count, 7);
    let replicas: u64 = stores.iter().map(|s| s.stats().shards).sum();
    assert_eq!(replicas, 14);

    let downloaded = plane.download_bytes("dataset.csv").await.unwrap();
    assert_eq!(downloaded.as_ref(), data.as_slice());

    let outcome = plane.delete("dataset.csv").await.unwrap();
    assert_eq!(outcome.shards_deleted, 14);
    assert!(stores.iter().all(|s| s.stats().shards == 0));
}

#[tokio::test]
async fn test_agent_registers_and_heartbeats() {
    let plane = Arc::new(
        ControlPlane::new(
            Default::default(),
            HttpRenterClient::new(Duration::from_secs(5)).unwrap(),
            MetadataStore::temporary().unwrap(),
        )
        .unwrap(),
    );
    let coordinator = spawn_server(coordinator_router(plane.clone())).await;

    let config = RenterConfig {
        bind_addr: "127.0.0.1:9301".parse().unwrap(),
        coordinator_url: format!("http://{}", coordinator),
        capacity_bytes: Some(4096),
        rack: Some(2),
        ..Default::default()
    };
    let renter_id = Arc::new(AtomicU64::new(0));
    let mut agent = HeartbeatAgent::new(&config, renter_id.clone()).unwrap();
    assert_eq!(agent.renter_id(), None);

    agent.tick().await;
    let id = agent.renter_id().unwrap();
    let renters = plane.list_renters();
    assert_eq!(renters.len(), 1);
    assert_eq!(renters[0].info.address, "http://127.0.0.1:9301");
    assert_eq!(renters[0].info.capacity_bytes, Some(4096));
    assert_eq!(renters[0].info.rack, 2);

    agent.heartbeat(id).await.unwrap();
    let err = agent.heartbeat(id + 100).await.unwrap_err();
    assert!(matches!(err, shardfs::Error::Renter { status: 404, .. }));

    // A forgotten id makes the agent register again
    renter_id.store(id + 100, Ordering::SeqCst);
    agent.tick().await;
    assert_eq!(agent.renter_id(), Some(id + 1));
    assert_eq!(plane.list_renters().len(), 2);
}
