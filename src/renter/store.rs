//! On-disk shard storage
//!
//! Layout: `data/aa/bb/<internal_id>.<index>.shard`, where `aa/bb` come from
//! BLAKE3 of the file name so no directory grows unbounded.
//!
//! Record format:
//! `[MAGIC:4 "SHRD"][LEN:8 LE][PAYLOAD:LEN][CRC32(PAYLOAD):4 LE]`
//!
//! Writes go to a temporary file that is synced and renamed into place, so a
//! reader sees either the old shard or the new one, never a torn write.

use crate::common::{crc32, shard_prefix, Error, Result};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const SHARD_MAGIC: [u8; 4] = *b"SHRD";
const HEADER_LEN: u64 = 12;
const TRAILER_LEN: u64 = 4;
const SHARD_EXT: &str = "shard";

/// Store statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub shards: u64,
    pub bytes: u64,
    pub capacity_bytes: Option<u64>,
}

pub struct ShardStore {
    root: PathBuf,
    capacity_bytes: Option<u64>,
    shards: AtomicU64,
    bytes: AtomicU64,
}

impl ShardStore {
    /// Open or create a store rooted at `root`, counting what is already there.
    pub fn open(root: impl AsRef<Path>, capacity_bytes: Option<u64>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let store = Self {
            root,
            capacity_bytes,
            shards: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        };
        let (shards, bytes) = store.scan()?;
        store.shards.store(shards, Ordering::SeqCst);
        store.bytes.store(bytes, Ordering::SeqCst);

        tracing::info!(
            "ShardStore opened at {}: {} shards, {} bytes",
            store.root.display(),
            shards,
            bytes
        );
        Ok(store)
    }

    pub fn put(&self, internal_id: &str, index: u32, data: &[u8]) -> Result<()> {
        let path = self.shard_path(internal_id, index)?;
        // A corrupt previous copy was never counted; overwrite it.
        let previous = self.payload_len(&path).ok().flatten();

        if let Some(capacity) = self.capacity_bytes {
            let used = self
                .bytes
                .load(Ordering::SeqCst)
                .saturating_sub(previous.unwrap_or(0));
            let available = capacity.saturating_sub(used);
            if data.len() as u64 > available {
                return Err(Error::CapacityExceeded {
                    needed: data.len() as u64,
                    available,
                });
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        let written = (|| -> Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&SHARD_MAGIC)?;
            file.write_all(&(data.len() as u64).to_le_bytes())?;
            file.write_all(data)?;
            file.write_all(&crc32(data).to_le_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &path)?;
            Ok(())
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        match previous {
            Some(old) => {
                self.bytes.fetch_sub(old, Ordering::SeqCst);
            }
            None => {
                self.shards.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.bytes.fetch_add(data.len() as u64, Ordering::SeqCst);

        tracing::debug!("Stored {}#{} ({} bytes)", internal_id, index, data.len());
        Ok(())
    }

    /// Read a shard, verifying its framing and CRC.
    pub fn get(&self, internal_id: &str, index: u32) -> Result<Option<Vec<u8>>> {
        let path = self.shard_path(internal_id, index)?;
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file_len = file.metadata()?.len();
        let len = read_header(&mut file)?;
        if HEADER_LEN + len + TRAILER_LEN != file_len {
            return Err(Error::Corrupted(format!(
                "{}: header says {} bytes, file holds {}",
                path.display(),
                len,
                file_len.saturating_sub(HEADER_LEN + TRAILER_LEN)
            )));
        }

        let mut payload = vec![0u8; len as usize];
        file.read_exact(&mut payload)?;
        let mut crc = [0u8; 4];
        file.read_exact(&mut crc)?;

        let expected = u32::from_le_bytes(crc);
        let actual = crc32(&payload);
        if expected != actual {
            return Err(Error::ChecksumMismatch {
                expected: format!("{:08x}", expected),
                actual: format!("{:08x}", actual),
            });
        }

        Ok(Some(payload))
    }

    /// Remove a shard. Returns whether it existed.
    pub fn delete(&self, internal_id: &str, index: u32) -> Result<bool> {
        let path = self.shard_path(internal_id, index)?;
        let Some(len) = self.payload_len(&path)? else {
            return Ok(false);
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                self.shards.fetch_sub(1, Ordering::SeqCst);
                self.bytes.fetch_sub(len, Ordering::SeqCst);
                tracing::debug!("Deleted {}#{}", internal_id, index);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            shards: self.shards.load(Ordering::SeqCst),
            bytes: self.bytes.load(Ordering::SeqCst),
            capacity_bytes: self.capacity_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard_path(&self, internal_id: &str, index: u32) -> Result<PathBuf> {
        validate_internal_id(internal_id)?;
        let name = format!("{}.{}.{}", internal_id, index, SHARD_EXT);
        let (dir1, dir2) = shard_prefix(&name);
        Ok(self.root.join(dir1).join(dir2).join(name))
    }

    fn payload_len(&self, path: &Path) -> Result<Option<u64>> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(read_header(&mut file)?))
    }

    /// Count shards and payload bytes on disk, dropping stale temp files.
    fn scan(&self) -> Result<(u64, u64)> {
        let mut shards = 0;
        let mut bytes = 0;
        for level1 in fs::read_dir(&self.root)? {
            let level1 = level1?.path();
            if !level1.is_dir() {
                continue;
            }
            for level2 in fs::read_dir(&level1)? {
                let level2 = level2?.path();
                if !level2.is_dir() {
                    continue;
                }
                for entry in fs::read_dir(&level2)? {
                    let path = entry?.path();
                    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
                    if ext.starts_with("tmp-") {
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if ext != SHARD_EXT {
                        continue;
                    }
                    match self.payload_len(&path) {
                        Ok(Some(len)) => {
                            shards += 1;
                            bytes += len;
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
                    }
                }
            }
        }
        Ok((shards, bytes))
    }
}

fn read_header(file: &mut File) -> Result<u64> {
    let mut header = [0u8; HEADER_LEN as usize];
    file.read_exact(&mut header)
        .map_err(|_| Error::Corrupted("truncated shard header".into()))?;
    if header[..4] != SHARD_MAGIC {
        return Err(Error::Corrupted("invalid shard magic".into()));
    }
    let mut len = [0u8; 8];
    len.copy_from_slice(&header[4..]);
    Ok(u64::from_le_bytes(len))
}

/// Internal ids become file names; keep them to a safe alphabet.
fn validate_internal_id(internal_id: &str) -> Result<()> {
    let ok = !internal_id.is_empty()
        && internal_id.len() <= 128
        && internal_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid shard id: {:?}", internal_id)))
    }
}
