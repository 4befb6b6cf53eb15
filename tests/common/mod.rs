//! Shared fixtures: an in-memory shard transport with fault injection and
//! helpers to stand up a control plane over it.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use shardfs::common::{CoordinatorConfig, Error, Result};
use shardfs::coordinator::{ControlPlane, MetadataStore, RenterInfo, ShardKey, ShardTransport};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct FakeState {
    shards: DashMap<(String, ShardKey), Bytes>,
    down: DashSet<String>,
    full: DashSet<String>,
    corrupt: DashSet<String>,
    stalled: DashSet<String>,
    slow: DashMap<String, Duration>,
    rejected: DashSet<u32>,
    failing_stores: DashMap<String, usize>,
    store_attempts: DashMap<String, usize>,
    deletes: AtomicUsize,
}

/// Renters living in a map. Clones share the same shards.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<FakeState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call to `address` fails as if the host were unreachable.
    pub fn take_down(&self, address: &str) {
        self.state.down.insert(address.to_string());
    }

    pub fn bring_up(&self, address: &str) {
        self.state.down.remove(address);
    }

    /// Stores on `address` answer 507.
    pub fn fill_up(&self, address: &str) {
        self.state.full.insert(address.to_string());
    }

    /// Fetches from `address` return flipped bytes.
    pub fn corrupt(&self, address: &str) {
        self.state.corrupt.insert(address.to_string());
    }

    /// Calls to `address` hang until the caller gives up.
    pub fn stall(&self, address: &str) {
        self.state.stalled.insert(address.to_string());
    }

    /// Stores on `address` land after `delay`, even if the caller hangs up
    /// first, like a renter still writing after the client disconnected.
    pub fn slow_stores(&self, address: &str, delay: Duration) {
        self.state.slow.insert(address.to_string(), delay);
    }

    /// Every renter answers 507 to stores of shard `index`.
    pub fn reject_shard(&self, index: u32) {
        self.state.rejected.insert(index);
    }

    /// The next `n` stores on `address` answer 503.
    pub fn fail_next_stores(&self, address: &str, n: usize) {
        self.state.failing_stores.insert(address.to_string(), n);
    }

    pub fn store_attempts(&self, address: &str) -> usize {
        self.state
            .store_attempts
            .get(address)
            .map(|n| *n)
            .unwrap_or(0)
    }

    pub fn holds(&self, address: &str, key: &ShardKey) -> bool {
        self.state
            .shards
            .contains_key(&(address.to_string(), key.clone()))
    }

    pub fn shards_on(&self, address: &str) -> usize {
        self.state
            .shards
            .iter()
            .filter(|e| e.key().0 == address)
            .count()
    }

    pub fn total_shards(&self) -> usize {
        self.state.shards.len()
    }

    pub fn deletes(&self) -> usize {
        self.state.deletes.load(Ordering::SeqCst)
    }

    async fn gate(&self, address: &str) -> Result<()> {
        if self.state.stalled.contains(address) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.state.down.contains(address) {
            return Err(Error::Http(format!("connection refused: {}", address)));
        }
        Ok(())
    }
}

#[async_trait]
impl ShardTransport for FakeTransport {
    async fn store_shard(&self, address: &str, key: &ShardKey, data: Bytes) -> Result<()> {
        *self
            .state
            .store_attempts
            .entry(address.to_string())
            .or_insert(0) += 1;
        self.gate(address).await?;

        if self.state.full.contains(address) || self.state.rejected.contains(&key.index) {
            return Err(Error::Renter {
                status: 507,
                message: "disk full".into(),
            });
        }
        if let Some(mut remaining) = self.state.failing_stores.get_mut(address) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Renter {
                    status: 503,
                    message: "busy".into(),
                });
            }
        }

        let slot = (address.to_string(), key.clone());
        if let Some(delay) = self.state.slow.get(address).map(|d| *d) {
            let state = self.state.clone();
            let write = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                state.shards.insert(slot, data);
            });
            return write
                .await
                .map_err(|e| Error::Internal(e.to_string()));
        }

        self.state.shards.insert(slot, data);
        Ok(())
    }

    async fn fetch_shard(&self, address: &str, key: &ShardKey) -> Result<Bytes> {
        self.gate(address).await?;
        let data = self
            .state
            .shards
            .get(&(address.to_string(), key.clone()))
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::Renter {
                status: 404,
                message: format!("no shard {}", key),
            })?;

        if self.state.corrupt.contains(address) {
            let flipped: Vec<u8> = data.iter().map(|b| !b).collect();
            return Ok(Bytes::from(flipped));
        }
        Ok(data)
    }

    async fn delete_shard(&self, address: &str, key: &ShardKey) -> Result<()> {
        self.gate(address).await?;
        self.state.deletes.fetch_add(1, Ordering::SeqCst);
        self.state
            .shards
            .remove(&(address.to_string(), key.clone()));
        Ok(())
    }
}

/// Small shards and short timeouts
pub fn test_config(replication_factor: usize) -> CoordinatorConfig {
    CoordinatorConfig {
        replication_factor,
        max_shard_size: 64 * 1024,
        min_shards: 3,
        heartbeat_interval_ms: 100,
        heartbeat_timeout_ms: 1_000,
        eviction_timeout_ms: 3_000,
        sweep_interval_ms: 50,
        request_timeout_ms: 300,
        transfer_concurrency: 4,
        ..Default::default()
    }
}

pub fn plane_with(
    config: CoordinatorConfig,
    transport: FakeTransport,
    metadata: MetadataStore,
) -> Arc<ControlPlane<FakeTransport>> {
    Arc::new(ControlPlane::new(config, transport, metadata).unwrap())
}

/// A fresh control plane over a temporary metadata store.
pub fn plane(replication_factor: usize) -> Arc<ControlPlane<FakeTransport>> {
    plane_with(
        test_config(replication_factor),
        FakeTransport::new(),
        MetadataStore::temporary().unwrap(),
    )
}

pub fn address(n: usize) -> String {
    format!("http://renter-{}:8001", n)
}

/// Register `count` renters at `address(1)..=address(count)`.
pub fn register_renters(plane: &ControlPlane<FakeTransport>, count: usize) -> Vec<RenterInfo> {
    (1..=count)
        .map(|n| plane.register(&address(n), Some(1 << 30), None).unwrap())
        .collect()
}

/// Deterministic, non-repeating-looking content
pub fn payload(len: usize) -> Bytes {
    Bytes::from(
        (0..len)
            .map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8)
            .collect::<Vec<u8>>(),
    )
}
