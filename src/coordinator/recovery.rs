//! Eviction handling, re-replication and expiry
//!
//! When the liveness sweep removes a renter every record naming it is
//! scanned. A shard that still has a live replica is copied onto an active
//! renter that does not hold it yet; when no target exists or the copy fails
//! the dead holder is dropped and the shard stays under-replicated. A shard
//! whose only holders are gone leaves its file `Degraded`; with a
//! replication factor of 1 that is the only possible outcome.

use crate::common::{timestamp_now_millis, METRICS};
use crate::coordinator::control::ControlPlane;
use crate::coordinator::files::{FileStatus, ShardAssignment};
use crate::coordinator::registry::{RenterId, RenterStatus, Transition};
use crate::coordinator::transport::{ShardKey, ShardTransport};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedistributionReport {
    pub renter: RenterId,
    pub files_scanned: usize,
    pub shards_affected: usize,
    pub shards_rereplicated: usize,
    pub files_degraded: usize,
}

/// What one maintenance pass did
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub transitions: Vec<Transition>,
    pub redistributions: Vec<RedistributionReport>,
    pub files_expired: usize,
}

impl<T: ShardTransport> ControlPlane<T> {
    /// Liveness sweep, eviction handling and expiry in one pass.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        self.run_maintenance_at(Instant::now()).await
    }

    /// [`run_maintenance`](Self::run_maintenance) with liveness judged as of `now`.
    pub async fn run_maintenance_at(&self, now: Instant) -> MaintenanceReport {
        let transitions = self.apply_sweep(self.registry.sweep_at(now));

        let mut redistributions = Vec::new();
        for transition in &transitions {
            if transition.to == RenterStatus::Removed {
                redistributions.push(self.handle_eviction(transition.id).await);
            }
        }

        let files_expired = self.expire_files().await;
        self.refresh_gauges();

        MaintenanceReport {
            transitions,
            redistributions,
            files_expired,
        }
    }

    /// Log and persist the transitions a sweep produced.
    pub(crate) fn apply_sweep(&self, transitions: Vec<Transition>) -> Vec<Transition> {
        for t in &transitions {
            match t.to {
                RenterStatus::Suspected => {
                    METRICS.renters_suspected.inc();
                    tracing::warn!("{} missed its heartbeats, suspected", t.id);
                }
                RenterStatus::Removed => {
                    METRICS.renters_evicted.inc();
                    tracing::warn!("{} silent past the eviction timeout, removed", t.id);
                }
                RenterStatus::Active => {}
            }
            self.persist_renter(t.id);
        }
        transitions
    }

    /// Scan every record that names `renter` and repair what can be repaired.
    pub async fn handle_eviction(&self, renter: RenterId) -> RedistributionReport {
        let affected = self.files.holding(renter);
        let mut report = RedistributionReport {
            renter,
            files_scanned: self.files.len(),
            shards_affected: 0,
            shards_rereplicated: 0,
            files_degraded: 0,
        };

        for internal_id in affected {
            let Some(record) = self.files.get(&internal_id) else {
                continue;
            };

            let mut changed = false;
            for shard in record.shards.iter().filter(|s| s.renters.contains(&renter)) {
                report.shards_affected += 1;

                let survivors: Vec<RenterId> = shard
                    .renters
                    .iter()
                    .copied()
                    .filter(|id| *id != renter && !self.registry.is_lost(*id))
                    .collect();
                if survivors.is_empty() {
                    continue;
                }

                let replacement = self.rereplicate(&internal_id, shard, &survivors).await;
                let applied = self.files.update(&internal_id, |r| {
                    let Some(s) = r.shards.get_mut(shard.index as usize) else {
                        return;
                    };
                    match replacement {
                        Some(new_id) => {
                            for slot in s.renters.iter_mut().filter(|id| **id == renter) {
                                *slot = new_id;
                            }
                        }
                        None => s.renters.retain(|id| *id != renter),
                    }
                });

                match (applied, replacement) {
                    (Some(_), Some(_)) => {
                        report.shards_rereplicated += 1;
                        METRICS.shards_rereplicated.inc();
                        changed = true;
                    }
                    (Some(_), None) => changed = true,
                    (None, Some(new_id)) => {
                        // Deleted while we copied; drop the orphan copy.
                        if let Some(address) = self.registry.address(new_id) {
                            let key = ShardKey::new(&internal_id, shard.index);
                            let _ = self
                                .timed("orphan cleanup", self.transport.delete_shard(&address, &key))
                                .await;
                        }
                    }
                    (None, None) => {}
                }
            }

            if changed {
                if let Some(updated) = self.files.get(&internal_id) {
                    if let Err(e) = self.metadata.put_file(&updated) {
                        tracing::warn!("Failed to persist {}: {}", internal_id, e);
                    }
                }
            }

            if let Some(current) = self.files.get(&internal_id) {
                if self.file_status(&current) == FileStatus::Degraded {
                    report.files_degraded += 1;
                    tracing::warn!(
                        "{} ({}) is degraded after losing {}",
                        current.filename,
                        internal_id,
                        renter
                    );
                }
            }
        }

        tracing::info!(
            "Redistribution for {}: {} files scanned, {} shards affected, {} re-replicated, {} files degraded",
            renter,
            report.files_scanned,
            report.shards_affected,
            report.shards_rereplicated,
            report.files_degraded
        );
        report
    }

    /// Copy a shard from a survivor to a renter that does not hold it.
    async fn rereplicate(
        &self,
        internal_id: &str,
        shard: &ShardAssignment,
        survivors: &[RenterId],
    ) -> Option<RenterId> {
        let snapshot = self.registry.active_snapshot();
        let racks_used: Vec<u32> = survivors
            .iter()
            .filter_map(|id| self.registry.rack(*id))
            .collect();
        let Some(target) = self
            .placement
            .replacement(shard.index, &snapshot, &shard.renters, &racks_used)
        else {
            tracing::warn!(
                "No spare renter for shard {}#{}, keeping {} replicas",
                internal_id,
                shard.index,
                survivors.len()
            );
            return None;
        };

        let key = ShardKey::new(internal_id, shard.index);
        let mut data = None;
        for source in survivors {
            match self.fetch_from(*source, &key, shard).await {
                Ok(bytes) => {
                    data = Some(bytes);
                    break;
                }
                Err(e) => tracing::warn!("Re-replication read of {} from {} failed: {}", key, source, e),
            }
        }
        let data = data?;

        match self.store_on(target, &key, &data).await {
            Ok(()) => {
                tracing::info!("Re-replicated shard {} onto {}", key, target.id);
                Some(target.id)
            }
            Err(e) => {
                tracing::warn!("Re-replication of {} onto {} failed: {}", key, target.id, e);
                let _ = self
                    .timed("rollback copy", self.transport.delete_shard(&target.address, &key))
                    .await;
                None
            }
        }
    }

    /// Delete every record whose TTL has passed. Returns how many went.
    pub async fn expire_files(&self) -> usize {
        let mut expired = 0;
        for internal_id in self.files.expired(timestamp_now_millis()) {
            let Some(record) = self.files.get(&internal_id) else {
                continue;
            };
            match self.delete_record(&record).await {
                Ok(_) => {
                    expired += 1;
                    METRICS.files_expired.inc();
                    tracing::info!("Expired {} ({})", record.filename, internal_id);
                }
                Err(e) => tracing::warn!("Failed to expire {}: {}", internal_id, e),
            }
        }
        expired
    }

    /// Filenames of visible uploads with an unrecoverable shard
    pub fn degraded_files(&self) -> Vec<String> {
        self.files
            .list(timestamp_now_millis())
            .into_iter()
            .filter(|r| self.file_status(r) == FileStatus::Degraded)
            .map(|r| r.filename)
            .collect()
    }
}
