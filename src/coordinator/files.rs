//! File records and the in-memory assignment table
//!
//! A [`FileRecord`] binds a filename to its ordered shard assignments. Records
//! enter the table only once every shard is stored, so readers never see a
//! partial upload. The table is keyed by internal id; several uploads may share
//! a filename and lookups by name resolve to the most recent one.

use crate::common::{Error, Result};
use crate::coordinator::registry::RenterId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Where one shard lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAssignment {
    pub index: u32,
    pub size: u64,
    pub blake3: String,
    /// Replica holders, primary first
    pub renters: Vec<RenterId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    pub internal_id: String,
    pub shard_count: u32,
    pub size_bytes: u64,
    pub upload_time: u64,
    /// Tie-breaker for uploads landing in the same millisecond
    pub sequence: u64,
    pub blake3: String,
    pub expires_at: Option<u64>,
    pub shards: Vec<ShardAssignment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Committed,
    /// At least one shard has no surviving holder
    Degraded,
}

/// Client-facing view of a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSummary {
    pub filename: String,
    pub internal_id: String,
    pub shard_count: u32,
    pub size_bytes: u64,
    pub upload_time: u64,
    pub expires_at: Option<u64>,
    pub blake3: String,
    pub status: FileStatus,
    pub shards: Vec<ShardAssignment>,
}

impl FileRecord {
    /// Check the ordering invariant: indices are exactly `0..shard_count`
    /// and every shard has at least one holder.
    pub fn validate(&self) -> Result<()> {
        if self.shards.len() != self.shard_count as usize {
            return Err(Error::Validation(format!(
                "{} has {} assignments for {} shards",
                self.internal_id,
                self.shards.len(),
                self.shard_count
            )));
        }
        for (expected, shard) in self.shards.iter().enumerate() {
            if shard.index as usize != expected {
                return Err(Error::Validation(format!(
                    "{} shard at position {} has index {}",
                    self.internal_id, expected, shard.index
                )));
            }
            if shard.renters.is_empty() {
                return Err(Error::Validation(format!(
                    "{} shard {} has no holder",
                    self.internal_id, shard.index
                )));
            }
        }
        Ok(())
    }

    pub fn holds(&self, renter: RenterId) -> bool {
        self.shards.iter().any(|s| s.renters.contains(&renter))
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.map(|t| t <= now_ms).unwrap_or(false)
    }

    /// Derived status given a predicate telling which renters are gone.
    pub fn status(&self, is_lost: impl Fn(RenterId) -> bool) -> FileStatus {
        let degraded = self
            .shards
            .iter()
            .any(|s| s.renters.iter().all(|r| is_lost(*r)));
        if degraded {
            FileStatus::Degraded
        } else {
            FileStatus::Committed
        }
    }

    pub fn summary(&self, status: FileStatus) -> FileSummary {
        FileSummary {
            filename: self.filename.clone(),
            internal_id: self.internal_id.clone(),
            shard_count: self.shard_count,
            size_bytes: self.size_bytes,
            upload_time: self.upload_time,
            expires_at: self.expires_at,
            blake3: self.blake3.clone(),
            status,
            shards: self.shards.clone(),
        }
    }
}

/// Assignment table keyed by internal id
pub struct FileTable {
    files: DashMap<String, FileRecord>,
    sequence: AtomicU64,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Load records persisted before a restart
    pub fn restore(&self, records: Vec<FileRecord>) {
        for record in records {
            self.sequence
                .fetch_max(record.sequence + 1, Ordering::SeqCst);
            self.files.insert(record.internal_id.clone(), record);
        }
    }

    pub fn insert(&self, record: FileRecord) {
        self.files.insert(record.internal_id.clone(), record);
    }

    pub fn get(&self, internal_id: &str) -> Option<FileRecord> {
        self.files.get(internal_id).map(|r| r.value().clone())
    }

    pub fn remove(&self, internal_id: &str) -> Option<FileRecord> {
        self.files.remove(internal_id).map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Most recent unexpired upload under `filename`
    pub fn latest(&self, filename: &str, now_ms: u64) -> Option<FileRecord> {
        self.files
            .iter()
            .filter(|r| r.filename == filename && !r.is_expired(now_ms))
            .max_by_key(|r| (r.upload_time, r.sequence))
            .map(|r| r.value().clone())
    }

    /// Unexpired records ordered by filename, then upload order
    pub fn list(&self, now_ms: u64) -> Vec<FileRecord> {
        let mut all: Vec<FileRecord> = self
            .files
            .iter()
            .filter(|r| !r.is_expired(now_ms))
            .map(|r| r.value().clone())
            .collect();
        all.sort_by(|a, b| {
            a.filename
                .cmp(&b.filename)
                .then(a.upload_time.cmp(&b.upload_time))
                .then(a.sequence.cmp(&b.sequence))
        });
        all
    }

    /// Internal ids of records naming `renter`
    pub fn holding(&self, renter: RenterId) -> Vec<String> {
        self.files
            .iter()
            .filter(|r| r.holds(renter))
            .map(|r| r.internal_id.clone())
            .collect()
    }

    pub fn expired(&self, now_ms: u64) -> Vec<String> {
        self.files
            .iter()
            .filter(|r| r.is_expired(now_ms))
            .map(|r| r.internal_id.clone())
            .collect()
    }

    /// Mutate one record under its entry lock and return the new value.
    pub fn update<F>(&self, internal_id: &str, f: F) -> Option<FileRecord>
    where
        F: FnOnce(&mut FileRecord),
    {
        let mut entry = self.files.get_mut(internal_id)?;
        f(entry.value_mut());
        Some(entry.value().clone())
    }
}
