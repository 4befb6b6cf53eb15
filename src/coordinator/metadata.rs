//! Metadata store using sled
//!
//! Stores:
//! - File records (internal_id → shard assignments, size, digests)
//! - Renter registry (renter id → address, status)
//! - Coordinator bookkeeping (next renter id)

use crate::common::Result;
use crate::coordinator::files::FileRecord;
use crate::coordinator::registry::{RenterId, RenterInfo};
use std::path::Path;

const TREE_FILES: &str = "files";
const TREE_RENTERS: &str = "renters";
const TREE_META: &str = "meta";

const KEY_NEXT_RENTER_ID: &str = "next_renter_id";

/// Metadata store
pub struct MetadataStore {
    db: sled::Db,
    files: sled::Tree,
    renters: sled::Tree,
    meta: sled::Tree,
}

impl MetadataStore {
    /// Open or create metadata store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Throwaway store, removed when dropped
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        Ok(Self {
            files: db.open_tree(TREE_FILES)?,
            renters: db.open_tree(TREE_RENTERS)?,
            meta: db.open_tree(TREE_META)?,
            db,
        })
    }

    // === File operations ===

    pub fn put_file(&self, record: &FileRecord) -> Result<()> {
        let value = bincode::serialize(record)?;
        self.files.insert(record.internal_id.as_bytes(), value)?;
        Ok(())
    }

    pub fn get_file(&self, internal_id: &str) -> Result<Option<FileRecord>> {
        match self.files.get(internal_id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn delete_file(&self, internal_id: &str) -> Result<()> {
        self.files.remove(internal_id.as_bytes())?;
        Ok(())
    }

    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let mut records = Vec::new();
        for item in self.files.iter() {
            let (_, value) = item?;
            let record: FileRecord = bincode::deserialize(&value)?;
            records.push(record);
        }
        Ok(records)
    }

    // === Renter operations ===

    /// Register or update renter
    pub fn put_renter(&self, info: &RenterInfo) -> Result<()> {
        let value = bincode::serialize(info)?;
        self.renters.insert(info.id.0.to_be_bytes(), value)?;
        Ok(())
    }

    pub fn get_renter(&self, id: RenterId) -> Result<Option<RenterInfo>> {
        match self.renters.get(id.0.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_renters(&self) -> Result<Vec<RenterInfo>> {
        let mut renters = Vec::new();
        for item in self.renters.iter() {
            let (_, value) = item?;
            let info: RenterInfo = bincode::deserialize(&value)?;
            renters.push(info);
        }
        Ok(renters)
    }

    // === Bookkeeping ===

    pub fn put_next_renter_id(&self, next: u64) -> Result<()> {
        self.meta
            .insert(KEY_NEXT_RENTER_ID, next.to_be_bytes().to_vec())?;
        Ok(())
    }

    pub fn next_renter_id(&self) -> Result<u64> {
        match self.meta.get(KEY_NEXT_RENTER_ID)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                    crate::Error::Corrupted("next_renter_id is not 8 bytes".into())
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(1),
        }
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
