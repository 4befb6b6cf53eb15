//! Registration and heartbeats toward the coordinator
//!
//! The agent registers once, then heartbeats on a fixed interval. A 404 on a
//! heartbeat means the coordinator no longer knows this id (it evicted us, or
//! lost its state), so the agent registers again and takes the new id.

use crate::common::{Error, RenterConfig, Result};
use crate::coordinator::http::{RegisterRequest, RegisterResponse};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct HeartbeatAgent {
    client: reqwest::Client,
    coordinator_url: String,
    address: String,
    capacity_bytes: Option<u64>,
    rack: Option<u32>,
    interval: Duration,
    renter_id: Arc<AtomicU64>,
}

impl HeartbeatAgent {
    pub fn new(config: &RenterConfig, renter_id: Arc<AtomicU64>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.heartbeat_interval().max(Duration::from_secs(1)))
            .build()?;
        Ok(Self {
            client,
            coordinator_url: config.coordinator_url.trim_end_matches('/').to_string(),
            address: config.advertised_url(),
            capacity_bytes: config.capacity_bytes,
            rack: config.rack,
            interval: config.heartbeat_interval(),
            renter_id,
        })
    }

    pub fn renter_id(&self) -> Option<u64> {
        match self.renter_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    pub async fn register(&mut self) -> Result<u64> {
        let response = self
            .client
            .post(format!("{}/renters", self.coordinator_url))
            .json(&RegisterRequest {
                address: self.address.clone(),
                capacity_bytes: self.capacity_bytes,
                rack: self.rack,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Renter {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let registered: RegisterResponse = response.json().await?;
        self.renter_id.store(registered.renter_id, Ordering::SeqCst);
        if registered.heartbeat_interval_ms > 0 {
            self.interval = Duration::from_millis(registered.heartbeat_interval_ms);
        }
        tracing::info!(
            "Registered with {} as renter-{} (heartbeat every {:?})",
            self.coordinator_url,
            registered.renter_id,
            self.interval
        );
        Ok(registered.renter_id)
    }

    pub async fn heartbeat(&self, id: u64) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/renters/{}/heartbeat", self.coordinator_url, id))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(Error::Renter {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }

    /// One registration or heartbeat attempt.
    pub async fn tick(&mut self) {
        match self.renter_id() {
            None => {
                if let Err(e) = self.register().await {
                    tracing::warn!("Registration with {} failed: {}", self.coordinator_url, e);
                }
            }
            Some(id) => match self.heartbeat(id).await {
                Ok(()) => tracing::debug!("Heartbeat sent as renter-{}", id),
                Err(Error::Renter { status: 404, .. }) => {
                    tracing::warn!("Coordinator forgot renter-{}, registering again", id);
                    self.renter_id.store(0, Ordering::SeqCst);
                    if let Err(e) = self.register().await {
                        tracing::warn!("Re-registration failed: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Heartbeat failed: {}", e),
            },
        }
    }

    /// Heartbeat until `shutdown` flips to true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick().await;

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!("Heartbeat agent stopped");
    }
}
