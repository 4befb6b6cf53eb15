//! Renter server

use crate::common::{RenterConfig, Result};
use crate::coordinator::server::shutdown_signal;
use crate::renter::agent::HeartbeatAgent;
use crate::renter::http::{create_router, RenterState};
use crate::renter::store::ShardStore;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::watch;

pub struct RenterServer {
    config: RenterConfig,
}

impl RenterServer {
    pub fn new(config: RenterConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting renter");
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Advertised as: {}", self.config.advertised_url());
        tracing::info!("  Data path: {}", self.config.data_path.display());
        tracing::info!("  Coordinator: {}", self.config.coordinator_url);

        let store = Arc::new(ShardStore::open(
            &self.config.data_path,
            self.config.capacity_bytes,
        )?);
        let renter_id = Arc::new(AtomicU64::new(0));

        let router = create_router(
            RenterState {
                store,
                renter_id: renter_id.clone(),
            },
            self.config.max_shard_body as usize,
        );
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let agent = HeartbeatAgent::new(&self.config, renter_id)?;
        let agent_handle = tokio::spawn(agent.run(shutdown_rx));

        tracing::info!("✓ Renter ready");

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        if let Err(e) = &served {
            tracing::error!("HTTP server error: {}", e);
        }

        let _ = shutdown_tx.send(true);
        let _ = agent_handle.await;
        tracing::info!("Renter stopped");
        served.map_err(crate::Error::from)
    }
}
