//! Hashing utilities for shardfs
//!
//! - BLAKE3 for content addressing (shard and file digests)
//! - Two-level directory prefixes for the renter's on-disk layout

use blake3::Hasher;

/// Compute BLAKE3 hash of data, return hex string
pub fn blake3_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    format!("{}", hash)
}

/// Compute BLAKE3 hash incrementally (for streaming)
pub struct Blake3Hasher {
    hasher: Hasher,
}

impl Blake3Hasher {
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(&self) -> String {
        let hash = self.hasher.finalize();
        format!("{}", hash)
    }
}

impl Default for Blake3Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute directory prefix for shard storage (2-level hierarchy)
///
/// Returns (aa, bb) where aa and bb are the first two bytes of BLAKE3(name)
/// This creates a balanced directory tree: shards/aa/bb/name
pub fn shard_prefix(name: &str) -> (String, String) {
    let hash = blake3::hash(name.as_bytes());
    let bytes = hash.as_bytes();
    (format!("{:02x}", bytes[0]), format!("{:02x}", bytes[1]))
}
