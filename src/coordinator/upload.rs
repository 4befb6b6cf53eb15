//! Upload: split, place, store, commit
//!
//! Every replica a shard store is attempted on is tracked by a
//! [`RollbackGuard`] before the request goes out. The first shard that cannot
//! be placed aborts the upload: no new stores start, the ones in flight run to
//! completion, and then the guard deletes everything it tracked before the
//! error is returned. If the upload future is dropped mid-flight the guard
//! spawns the same deletes.

use crate::common::{blake3_hash, retry_once, timestamp_now_millis, validate_filename};
use crate::common::{Error, Result, METRICS};
use crate::coordinator::control::ControlPlane;
use crate::coordinator::files::{FileRecord, FileStatus, FileSummary, ShardAssignment};
use crate::coordinator::placement::{RenterTarget, ShardPlan};
use crate::coordinator::registry::RenterId;
use crate::coordinator::transport::{ShardKey, ShardTransport};
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Longest accepted time to live
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Explicit shard count; derived from the size when absent
    pub shard_count: Option<u32>,
    /// Time until the upload expires
    pub ttl: Option<Duration>,
}

/// Compensating deletes for a pending upload
pub(crate) struct RollbackGuard<T: ShardTransport> {
    transport: Arc<T>,
    stored: Mutex<Vec<(String, ShardKey)>>,
    aborted: AtomicBool,
    armed: bool,
}

impl<T: ShardTransport> RollbackGuard<T> {
    pub(crate) fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            stored: Mutex::new(Vec::new()),
            aborted: AtomicBool::new(false),
            armed: true,
        }
    }

    pub(crate) fn track(&self, address: &str, key: &ShardKey) {
        self.stored
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((address.to_string(), key.clone()));
    }

    /// Stop starting new stores for this upload.
    pub(crate) fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn take(&self) -> Vec<(String, ShardKey)> {
        std::mem::take(
            &mut *self
                .stored
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    /// The upload committed; keep everything.
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }

    /// Delete every tracked replica. Returns how many deletes succeeded.
    pub(crate) async fn rollback(mut self) -> usize {
        self.armed = false;
        let stored = self.take();
        delete_all(self.transport.clone(), stored).await
    }
}

impl<T: ShardTransport> Drop for RollbackGuard<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let stored = self.take();
        if stored.is_empty() {
            return;
        }
        tracing::warn!(
            "Upload cancelled, rolling back {} shard replicas",
            stored.len()
        );
        METRICS.upload_rollbacks.inc();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(delete_all(self.transport.clone(), stored));
            }
            Err(_) => tracing::error!("No runtime to roll back cancelled upload"),
        }
    }
}

async fn delete_all<T: ShardTransport>(transport: Arc<T>, stored: Vec<(String, ShardKey)>) -> usize {
    let results = futures_util::future::join_all(stored.iter().map(|(address, key)| {
        let transport = &transport;
        async move {
            let result = transport.delete_shard(address, key).await;
            if let Err(e) = &result {
                tracing::warn!("Rollback of shard {} on {} failed: {}", key, address, e);
            }
            result.is_ok()
        }
    }))
    .await;
    results.into_iter().filter(|ok| *ok).count()
}

fn check_ttl(ttl: Duration) -> Result<()> {
    if ttl.is_zero() || ttl > MAX_TTL {
        return Err(Error::Validation(format!(
            "TTL must be positive and at most {} seconds",
            MAX_TTL.as_secs()
        )));
    }
    Ok(())
}

/// Expiry timestamp for an upload made at `upload_time`
fn expiry(upload_time: u64, ttl: Duration) -> Result<u64> {
    check_ttl(ttl)?;
    u64::try_from(ttl.as_millis())
        .ok()
        .and_then(|ms| upload_time.checked_add(ms))
        .ok_or_else(|| Error::Validation("TTL overflows the expiry time".into()))
}

impl<T: ShardTransport> ControlPlane<T> {
    /// Shard `data`, store every shard on the active renters and commit the
    /// record. Nothing is visible to readers unless every shard was stored.
    pub async fn upload(
        &self,
        filename: &str,
        data: Bytes,
        options: UploadOptions,
    ) -> Result<FileSummary> {
        validate_filename(filename)?;
        if data.len() as u64 > self.config.max_upload_size {
            return Err(Error::Validation(format!(
                "{} bytes exceeds the {} byte upload limit",
                data.len(),
                self.config.max_upload_size
            )));
        }

        if let Some(ttl) = options.ttl {
            check_ttl(ttl)?;
        }

        let plan = ShardPlan::new(
            data.len() as u64,
            options.shard_count,
            self.config.max_shard_size,
            self.config.min_shards,
        )?;

        let snapshot = self.registry.active_snapshot();
        if snapshot.is_empty() {
            return Err(Error::NoRentersAvailable);
        }

        let internal_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            "Uploading {} as {} ({} bytes, {} shards, {} renters)",
            filename,
            internal_id,
            data.len(),
            plan.shard_count,
            snapshot.len()
        );

        let guard = RollbackGuard::new(self.transport.clone());
        let results: Vec<Result<Option<ShardAssignment>>> =
            stream::iter(plan.ranges().map(|(index, range)| {
                let key = ShardKey::new(internal_id.clone(), index);
                self.place_shard(&guard, &snapshot, key, data.slice(range))
            }))
            .buffer_unordered(self.config.transfer_concurrency)
            .collect()
            .await;

        let placed = results
            .into_iter()
            .collect::<Result<Vec<_>>>()
            .and_then(|shards| {
                shards
                    .into_iter()
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| Error::Internal("upload abandoned".into()))
            });

        let committed = match placed {
            Ok(shards) => self.commit(filename, &internal_id, &data, shards, &options),
            Err(e) => Err(e),
        };

        match committed {
            Ok(record) => {
                guard.disarm();
                METRICS.uploads_total.inc();
                METRICS.bytes_uploaded.add(record.size_bytes);
                tracing::info!("Committed {} ({})", record.filename, record.internal_id);
                Ok(record.summary(FileStatus::Committed))
            }
            Err(e) => {
                let deleted = guard.rollback().await;
                METRICS.upload_rollbacks.inc();
                tracing::warn!(
                    "Upload of {} failed: {} (rolled back {} replicas)",
                    filename,
                    e,
                    deleted
                );
                Err(e)
            }
        }
    }

    fn commit(
        &self,
        filename: &str,
        internal_id: &str,
        data: &Bytes,
        mut shards: Vec<ShardAssignment>,
        options: &UploadOptions,
    ) -> Result<FileRecord> {
        shards.sort_by_key(|s| s.index);
        let upload_time = timestamp_now_millis();
        let expires_at = options
            .ttl
            .map(|ttl| expiry(upload_time, ttl))
            .transpose()?;
        let record = FileRecord {
            filename: filename.to_string(),
            internal_id: internal_id.to_string(),
            shard_count: shards.len() as u32,
            size_bytes: data.len() as u64,
            upload_time,
            sequence: self.files.next_sequence(),
            blake3: blake3_hash(data),
            expires_at,
            shards,
        };
        record.validate()?;

        self.metadata.put_file(&record)?;
        self.files.insert(record.clone());
        Ok(record)
    }

    /// Store every replica of one shard.
    ///
    /// Each replica starts at its placement slot. A failed store is retried
    /// once on the same renter, then the rest of the snapshot is walked,
    /// skipping renters that already failed or already hold this shard and
    /// trying racks the shard is not on yet first. Returns `None` when a
    /// sibling shard aborted the upload first.
    async fn place_shard(
        &self,
        guard: &RollbackGuard<T>,
        snapshot: &[RenterTarget],
        key: ShardKey,
        data: Bytes,
    ) -> Result<Option<ShardAssignment>> {
        let positions = self.placement.positions(key.index, snapshot)?;
        let mut holders: Vec<RenterId> = Vec::with_capacity(positions.len());
        let mut racks: Vec<u32> = Vec::with_capacity(positions.len());
        let mut failed: Vec<RenterId> = Vec::new();

        for pos in positions {
            let mut last_error = None;
            let mut placed = false;
            let racks_used = racks.clone();

            let candidates = std::iter::once(&snapshot[pos])
                .chain(self.placement.candidates(pos, snapshot, &racks_used));
            for (step, target) in candidates.enumerate() {
                if holders.contains(&target.id) || failed.contains(&target.id) {
                    continue;
                }
                if guard.is_aborted() {
                    return Ok(None);
                }

                guard.track(&target.address, &key);
                match self.store_on(target, &key, &data).await {
                    Ok(()) => {
                        if step > 0 {
                            METRICS.shard_failovers.inc();
                            tracing::info!("Shard {} moved to fallback {}", key, target.id);
                        }
                        holders.push(target.id);
                        racks.push(target.rack);
                        placed = true;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Storing shard {} on {} failed: {}", key, target.id, e);
                        failed.push(target.id);
                        last_error = Some(e);
                    }
                }
            }

            if !placed {
                guard.abort();
                return Err(last_error.unwrap_or(Error::NoRentersAvailable));
            }
        }

        Ok(Some(ShardAssignment {
            index: key.index,
            size: data.len() as u64,
            blake3: blake3_hash(&data),
            renters: holders,
        }))
    }

    /// One store with a single retry against the same renter
    pub(crate) async fn store_on(&self, target: &RenterTarget, key: &ShardKey, data: &Bytes) -> Result<()> {
        let what = format!("store {} on {}", key, target.id);
        retry_once(
            || {
                self.timed(
                    &what,
                    self.transport.store_shard(&target.address, key, data.clone()),
                )
            },
            &what,
        )
        .await?;
        tracing::debug!("Stored shard {} ({} bytes) on {}", key, data.len(), target.id);
        Ok(())
    }
}
