//! The coordinator's state object
//!
//! [`ControlPlane`] owns the renter registry, the file table, the metadata
//! store and the shard transport. Operations are split across modules:
//! membership and listing live here, uploads in `upload`, downloads in
//! `download`, eviction handling and expiry in `recovery`.

use crate::common::{timestamp_now_millis, CoordinatorConfig, Error, Result, METRICS};
use crate::coordinator::files::{FileRecord, FileStatus, FileSummary, FileTable};
use crate::coordinator::metadata::MetadataStore;
use crate::coordinator::placement::PlacementManager;
use crate::coordinator::registry::{RenterId, RenterInfo, RenterRegistry, RenterStatus};
use crate::coordinator::transport::{ShardKey, ShardTransport};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// Renter as reported by `GET /renters`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenterView {
    #[serde(flatten)]
    pub info: RenterInfo,
    /// Milliseconds since the last heartbeat
    pub silence_ms: u64,
}

/// Result of deleting every upload under a filename
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub filename: String,
    pub uploads_removed: usize,
    pub shards_deleted: usize,
    pub shard_failures: usize,
}

pub struct ControlPlane<T: ShardTransport> {
    pub(crate) config: CoordinatorConfig,
    pub(crate) registry: RenterRegistry,
    pub(crate) files: FileTable,
    pub(crate) metadata: MetadataStore,
    pub(crate) placement: PlacementManager,
    pub(crate) transport: Arc<T>,
}

impl<T: ShardTransport> ControlPlane<T> {
    /// Build the control plane and reload whatever `metadata` holds.
    pub fn new(config: CoordinatorConfig, transport: T, metadata: MetadataStore) -> Result<Self> {
        config.validate()?;

        let registry = RenterRegistry::new(
            config.heartbeat_timeout(),
            config.eviction_timeout(),
            config.rack_count,
        );
        let renters = metadata.list_renters()?;
        let next_id = metadata.next_renter_id()?;
        let restored_renters = renters.len();
        registry.restore(renters, next_id, Instant::now());

        let files = FileTable::new();
        let records = metadata.list_files()?;
        let restored_files = records.len();
        files.restore(records);

        if restored_renters > 0 || restored_files > 0 {
            tracing::info!(
                "Restored {} renters (awaiting heartbeats) and {} files",
                restored_renters,
                restored_files
            );
        }

        let plane = Self {
            placement: PlacementManager::new(config.replication_factor),
            config,
            registry,
            files,
            metadata,
            transport: Arc::new(transport),
        };
        plane.refresh_gauges();
        Ok(plane)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &RenterRegistry {
        &self.registry
    }

    pub fn files(&self) -> &FileTable {
        &self.files
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    // === Membership ===

    pub fn register(
        &self,
        address: &str,
        capacity_bytes: Option<u64>,
        rack: Option<u32>,
    ) -> Result<RenterInfo> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::Validation("renter address cannot be empty".into()));
        }

        let info = self
            .registry
            .register(address.trim_end_matches('/').to_string(), capacity_bytes, rack);
        self.metadata.put_renter(&info)?;
        self.metadata.put_next_renter_id(self.registry.next_id())?;

        tracing::info!(
            "Registered {} at {} (rack {})",
            info.id,
            info.address,
            info.rack
        );
        self.refresh_gauges();
        Ok(info)
    }

    pub fn heartbeat(&self, id: RenterId) -> Result<()> {
        let previous = self.registry.heartbeat(id)?;
        if previous != RenterStatus::Active {
            tracing::info!("{} is back ({} -> active)", id, previous);
            self.persist_renter(id);
            self.refresh_gauges();
        }
        Ok(())
    }

    pub fn list_active(&self) -> Vec<RenterId> {
        self.registry.list_active()
    }

    pub fn list_renters(&self) -> Vec<RenterView> {
        self.registry
            .list()
            .into_iter()
            .map(|info| RenterView {
                silence_ms: self
                    .registry
                    .silence(info.id)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
                info,
            })
            .collect()
    }

    pub(crate) fn persist_renter(&self, id: RenterId) {
        if let Some(info) = self.registry.get(id) {
            if let Err(e) = self.metadata.put_renter(&info) {
                tracing::warn!("Failed to persist {}: {}", id, e);
            }
        }
    }

    // === Files ===

    pub fn file_status(&self, record: &FileRecord) -> FileStatus {
        record.status(|id| self.registry.is_lost(id))
    }

    pub fn summarize(&self, record: &FileRecord) -> FileSummary {
        record.summary(self.file_status(record))
    }

    /// Latest visible upload under `filename`
    pub fn lookup(&self, filename: &str) -> Result<FileRecord> {
        self.files
            .latest(filename, timestamp_now_millis())
            .ok_or_else(|| Error::NotFound(format!("file {}", filename)))
    }

    pub fn get_file(&self, filename: &str) -> Result<FileSummary> {
        self.lookup(filename).map(|r| self.summarize(&r))
    }

    pub fn list_files(&self) -> Vec<FileSummary> {
        self.files
            .list(timestamp_now_millis())
            .iter()
            .map(|r| self.summarize(r))
            .collect()
    }

    /// Delete every upload stored under `filename`.
    pub async fn delete(&self, filename: &str) -> Result<DeleteOutcome> {
        let now = timestamp_now_millis();
        let records: Vec<FileRecord> = self
            .files
            .list(now)
            .into_iter()
            .filter(|r| r.filename == filename)
            .collect();
        if records.is_empty() {
            return Err(Error::NotFound(format!("file {}", filename)));
        }

        let mut outcome = DeleteOutcome {
            filename: filename.to_string(),
            uploads_removed: 0,
            shards_deleted: 0,
            shard_failures: 0,
        };
        for record in &records {
            let (deleted, failed) = self.delete_record(record).await?;
            outcome.uploads_removed += 1;
            outcome.shards_deleted += deleted;
            outcome.shard_failures += failed;
        }

        tracing::info!(
            "Deleted {} ({} uploads, {} shard replicas, {} unreachable)",
            filename,
            outcome.uploads_removed,
            outcome.shards_deleted,
            outcome.shard_failures
        );
        self.refresh_gauges();
        Ok(outcome)
    }

    /// Fan out shard deletes to every holder still reachable, then drop the
    /// record. Returns (replicas deleted, replicas that failed).
    pub(crate) async fn delete_record(&self, record: &FileRecord) -> Result<(usize, usize)> {
        let mut targets = Vec::new();
        for shard in &record.shards {
            for renter in &shard.renters {
                let Some(info) = self.registry.get(*renter) else {
                    continue;
                };
                if info.status == RenterStatus::Removed {
                    continue;
                }
                targets.push((info.id, info.address, ShardKey::new(&record.internal_id, shard.index)));
            }
        }

        let results: Vec<(RenterId, ShardKey, Result<()>)> = stream::iter(targets)
            .map(|(id, address, key)| async move {
                let result = self
                    .timed(
                        &format!("delete {}", key),
                        self.transport.delete_shard(&address, &key),
                    )
                    .await;
                (id, key, result)
            })
            .buffer_unordered(self.config.transfer_concurrency)
            .collect()
            .await;

        let mut deleted = 0;
        let mut failed = 0;
        for (id, key, result) in results {
            match result {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::warn!("Could not delete shard {} from {}: {}", key, id, e);
                    failed += 1;
                }
            }
        }

        self.metadata.delete_file(&record.internal_id)?;
        self.files.remove(&record.internal_id);
        Ok((deleted, failed))
    }

    // === Helpers ===

    /// Bound a renter call by `request_timeout`.
    pub(crate) async fn timed<F, R>(&self, what: &str, fut: F) -> Result<R>
    where
        F: Future<Output = Result<R>>,
    {
        let limit = self.config.request_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!("{} after {:?}", what, limit))),
        }
    }

    pub fn refresh_gauges(&self) {
        METRICS
            .active_renters
            .set(self.registry.list_active().len() as u64);
        let degraded = self
            .files
            .list(timestamp_now_millis())
            .iter()
            .filter(|r| self.file_status(r) == FileStatus::Degraded)
            .count();
        METRICS.degraded_files.set(degraded as u64);
    }

    /// Flush persisted state
    pub fn flush(&self) -> Result<()> {
        self.metadata.flush()
    }
}
