//! Coordinator server

use crate::common::{CoordinatorConfig, Result};
use crate::coordinator::control::ControlPlane;
use crate::coordinator::http::create_router;
use crate::coordinator::metadata::MetadataStore;
use crate::coordinator::monitor::LivenessMonitor;
use crate::coordinator::transport::HttpRenterClient;
use std::sync::Arc;

pub struct Coordinator {
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting coordinator");
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  DB path: {}", self.config.db_path.display());
        tracing::info!("  Replication factor: {}", self.config.replication_factor);
        tracing::info!(
            "  Heartbeat timeout: {}ms, eviction timeout: {}ms",
            self.config.heartbeat_timeout_ms,
            self.config.eviction_timeout_ms
        );

        let metadata = MetadataStore::open(&self.config.db_path)?;
        let transport = HttpRenterClient::new(self.config.request_timeout())?;
        let plane = Arc::new(ControlPlane::new(self.config.clone(), transport, metadata)?);

        let monitor = LivenessMonitor::start(plane.clone());
        let router = create_router(plane.clone());

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("✓ Coordinator ready");

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        if let Err(e) = &served {
            tracing::error!("HTTP server error: {}", e);
        }

        monitor.shutdown().await;
        plane.flush()?;
        tracing::info!("Coordinator stopped");
        served.map_err(crate::Error::from)
    }
}

/// Resolves on Ctrl-C
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
