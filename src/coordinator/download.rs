//! Download: ordered reconstruction with bounded memory
//!
//! Shards are fetched `transfer_concurrency` at a time and yielded strictly in
//! index order. Each fetch is checked against the recorded length and BLAKE3
//! digest; a bad copy counts as a failed attempt.

use crate::common::{blake3_hash, retry_once, Error, Result, METRICS};
use crate::coordinator::control::ControlPlane;
use crate::coordinator::files::{FileRecord, FileStatus, FileSummary, ShardAssignment};
use crate::coordinator::registry::RenterId;
use crate::coordinator::transport::{ShardKey, ShardTransport};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;

pub type ShardStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// An opened download: the record being served and its shard stream
pub struct Download {
    pub summary: FileSummary,
    pub stream: ShardStream,
}

impl<T: ShardTransport> ControlPlane<T> {
    /// Open the latest upload under `filename` for reading.
    ///
    /// Fails with `ShardUnavailable` before any fetch when some shard has no
    /// surviving holder.
    pub fn download(self: &Arc<Self>, filename: &str) -> Result<Download> {
        let record = self.lookup(filename)?;

        if self.file_status(&record) == FileStatus::Degraded {
            let lost = record
                .shards
                .iter()
                .find(|s| s.renters.iter().all(|r| self.registry.is_lost(*r)))
                .map(|s| s.index)
                .unwrap_or(0);
            METRICS.download_failures.inc();
            return Err(Error::ShardUnavailable {
                internal_id: record.internal_id.clone(),
                index: lost,
            });
        }

        let summary = record.summary(FileStatus::Committed);
        let stream = self.shard_stream(record);
        Ok(Download { summary, stream })
    }

    /// Whole file in memory; no partial output on failure.
    pub async fn download_bytes(self: &Arc<Self>, filename: &str) -> Result<Bytes> {
        let mut download = self.download(filename)?;
        let mut buf = BytesMut::with_capacity(download.summary.size_bytes as usize);
        while let Some(chunk) = download.stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    fn shard_stream(self: &Arc<Self>, record: FileRecord) -> ShardStream {
        let plane = Arc::clone(self);
        let concurrency = self.config.transfer_concurrency;
        let internal_id = record.internal_id.clone();

        Box::pin(async_stream::stream! {
            let fetches = stream::iter(record.shards.into_iter().map(|shard| {
                let plane = Arc::clone(&plane);
                let internal_id = internal_id.clone();
                async move { plane.fetch_shard(&internal_id, &shard).await }
            }))
            .buffered(concurrency);
            futures_util::pin_mut!(fetches);

            let mut failed = false;
            while let Some(result) = fetches.next().await {
                match result {
                    Ok(bytes) => {
                        METRICS.bytes_downloaded.add(bytes.len() as u64);
                        yield Ok(bytes);
                    }
                    Err(e) => {
                        failed = true;
                        METRICS.download_failures.inc();
                        tracing::warn!("Download of {} aborted: {}", internal_id, e);
                        yield Err(e);
                        break;
                    }
                }
            }
            if !failed {
                METRICS.downloads_total.inc();
            }
        })
    }

    /// Fetch one shard from the first replica that returns a verified copy.
    pub(crate) async fn fetch_shard(&self, internal_id: &str, shard: &ShardAssignment) -> Result<Bytes> {
        let key = ShardKey::new(internal_id, shard.index);

        for (attempt, renter) in shard.renters.iter().enumerate() {
            match self.fetch_from(*renter, &key, shard).await {
                Ok(bytes) => {
                    if attempt > 0 {
                        METRICS.shard_failovers.inc();
                    }
                    return Ok(bytes);
                }
                Err(e) => {
                    tracing::warn!("Fetching shard {} from {} failed: {}", key, renter, e);
                }
            }
        }

        Err(Error::ShardUnavailable {
            internal_id: internal_id.to_string(),
            index: shard.index,
        })
    }

    /// One replica, one retry, verified against the recorded digest
    pub(crate) async fn fetch_from(
        &self,
        renter: RenterId,
        key: &ShardKey,
        shard: &ShardAssignment,
    ) -> Result<Bytes> {
        if self.registry.is_lost(renter) {
            return Err(Error::NotFound(format!("{} was evicted", renter)));
        }
        let address = self
            .registry
            .address(renter)
            .ok_or_else(|| Error::NotFound(format!("{} is not registered", renter)))?;

        let what = format!("fetch {} from {}", key, renter);
        let (what_ref, address) = (&what, &address);
        let bytes = retry_once(
            || async move {
                let bytes = self
                    .timed(what_ref, self.transport.fetch_shard(address, key))
                    .await?;
                verify(&bytes, shard)?;
                Ok(bytes)
            },
            &what,
        )
        .await?;

        tracing::debug!("Fetched shard {} ({} bytes) from {}", key, bytes.len(), renter);
        Ok(bytes)
    }
}

fn verify(bytes: &Bytes, shard: &ShardAssignment) -> Result<()> {
    if bytes.len() as u64 != shard.size {
        return Err(Error::ChecksumMismatch {
            expected: format!("{} bytes", shard.size),
            actual: format!("{} bytes", bytes.len()),
        });
    }
    let actual = blake3_hash(bytes);
    if actual != shard.blake3 {
        return Err(Error::ChecksumMismatch {
            expected: shard.blake3.clone(),
            actual,
        });
    }
    Ok(())
}
