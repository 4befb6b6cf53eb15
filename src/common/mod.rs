//! Common utilities and types shared across shardfs

pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, CoordinatorConfig, RenterConfig};
pub use error::{Error, Result};
pub use hash::{blake3_hash, shard_prefix, Blake3Hasher};
pub use metrics::METRICS;
pub use tracing_middleware::{request_tracing_middleware, REQUEST_ID_HEADER};
pub use utils::{
    crc32, encode_name, format_bytes, parse_duration, retry_once,
    timestamp_now_millis, validate_filename,
};
