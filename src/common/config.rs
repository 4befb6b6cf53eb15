//! Configuration for shardfs components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix, e.g. `SHARDFS_COORDINATOR__REPLICATION_FACTOR=2`
pub const ENV_PREFIX: &str = "SHARDFS";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator-specific config
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Renter-specific config
    #[serde(default)]
    pub renter: RenterConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            renter: RenterConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Layer an optional TOML file and `SHARDFS_*` environment variables over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let loaded: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        loaded.coordinator.validate()?;
        loaded.renter.validate()?;
        Ok(loaded)
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for the HTTP API
    #[serde(default = "default_coord_bind")]
    pub bind_addr: SocketAddr,

    /// sled path for the registry and assignment table
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Copies kept of every shard
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    /// Upper bound on a single shard's size
    #[serde(default = "default_max_shard_size")]
    pub max_shard_size: u64,

    /// Racks renters are spread over when they do not advertise one
    #[serde(default = "default_rack_count")]
    pub rack_count: u32,

    /// Shard count used for small files when the client does not ask for one
    #[serde(default = "default_min_shards")]
    pub min_shards: u32,

    /// Interval renters are told to heartbeat at
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Silence after which an active renter becomes suspected
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,

    /// Silence after which a renter is evicted
    #[serde(default = "default_eviction_timeout")]
    pub eviction_timeout_ms: u64,

    /// Liveness sweep period
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Bound on every coordinator -> renter call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Shard transfers in flight per upload/download
    #[serde(default = "default_transfer_concurrency")]
    pub transfer_concurrency: usize,

    /// Largest accepted upload body
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
}

fn default_coord_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./coord-data")
}
fn default_replication_factor() -> usize {
    1
}
fn default_max_shard_size() -> u64 {
    1024 * 1024
}
fn default_rack_count() -> u32 {
    3
}
fn default_min_shards() -> u32 {
    3
}
fn default_heartbeat_interval() -> u64 {
    5_000
}
fn default_heartbeat_timeout() -> u64 {
    15_000
}
fn default_eviction_timeout() -> u64 {
    60_000
}
fn default_sweep_interval() -> u64 {
    5_000
}
fn default_request_timeout() -> u64 {
    30_000
}
fn default_transfer_concurrency() -> usize {
    4
}
fn default_max_upload_size() -> u64 {
    256 * 1024 * 1024
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_coord_bind(),
            db_path: default_db_path(),
            replication_factor: default_replication_factor(),
            max_shard_size: default_max_shard_size(),
            rack_count: default_rack_count(),
            min_shards: default_min_shards(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            eviction_timeout_ms: default_eviction_timeout(),
            sweep_interval_ms: default_sweep_interval(),
            request_timeout_ms: default_request_timeout(),
            transfer_concurrency: default_transfer_concurrency(),
            max_upload_size: default_max_upload_size(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.replication_factor == 0 {
            return Err(Error::InvalidConfig(
                "replication_factor must be at least 1".into(),
            ));
        }
        if self.max_shard_size == 0 {
            return Err(Error::InvalidConfig("max_shard_size must be > 0".into()));
        }
        if self.min_shards == 0 {
            return Err(Error::InvalidConfig("min_shards must be at least 1".into()));
        }
        if self.rack_count == 0 {
            return Err(Error::InvalidConfig("rack_count must be at least 1".into()));
        }
        if self.transfer_concurrency == 0 {
            return Err(Error::InvalidConfig(
                "transfer_concurrency must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{} must be > 0", name)));
            }
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(Error::InvalidConfig(
                "heartbeat_timeout_ms must exceed heartbeat_interval_ms".into(),
            ));
        }
        if self.eviction_timeout_ms <= self.heartbeat_timeout_ms {
            return Err(Error::InvalidConfig(
                "eviction_timeout_ms must exceed heartbeat_timeout_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn eviction_timeout(&self) -> Duration {
        Duration::from_millis(self.eviction_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Renter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenterConfig {
    /// Bind address for the shard API
    #[serde(default = "default_renter_bind")]
    pub bind_addr: SocketAddr,

    /// URL the coordinator should use to reach this renter
    #[serde(default)]
    pub public_url: Option<String>,

    /// Shard directory
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Coordinator base URL
    #[serde(default = "default_coordinator_url")]
    pub coordinator_url: String,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Advertised storage capacity
    #[serde(default)]
    pub capacity_bytes: Option<u64>,

    /// Advertised rack; the coordinator assigns one when absent
    #[serde(default)]
    pub rack: Option<u32>,

    /// Largest shard body accepted
    #[serde(default = "default_max_shard_body")]
    pub max_shard_body: u64,
}

fn default_renter_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8001))
}
fn default_data_path() -> PathBuf {
    PathBuf::from("./renter-data")
}
fn default_coordinator_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_max_shard_body() -> u64 {
    64 * 1024 * 1024
}

impl Default for RenterConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_renter_bind(),
            public_url: None,
            data_path: default_data_path(),
            coordinator_url: default_coordinator_url(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            capacity_bytes: None,
            rack: None,
            max_shard_body: default_max_shard_body(),
        }
    }
}

impl RenterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat_interval_ms must be > 0".into(),
            ));
        }
        if self.coordinator_url.is_empty() {
            return Err(Error::InvalidConfig("coordinator_url is empty".into()));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Address advertised to the coordinator.
    pub fn advertised_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.bind_addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.coordinator.validate().unwrap();
        config.renter.validate().unwrap();
        assert_eq!(config.coordinator.replication_factor, 1);
        assert_eq!(config.coordinator.min_shards, 3);
    }

    #[test]
    fn test_rejects_zero_replication() {
        let config = CoordinatorConfig {
            replication_factor: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_timeouts() {
        let config = CoordinatorConfig {
            heartbeat_timeout_ms: 10_000,
            eviction_timeout_ms: 5_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_periods() {
        for config in [
            CoordinatorConfig {
                sweep_interval_ms: 0,
                ..Default::default()
            },
            CoordinatorConfig {
                request_timeout_ms: 0,
                ..Default::default()
            },
            CoordinatorConfig {
                heartbeat_interval_ms: 0,
                ..Default::default()
            },
            CoordinatorConfig {
                rack_count: 0,
                ..Default::default()
            },
        ] {
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shardfs.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "log_level = \"debug\"\n\n[coordinator]\nreplication_factor = 2\nmax_shard_size = 4096\n\n[renter]\ncapacity_bytes = 1000"
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.coordinator.replication_factor, 2);
        assert_eq!(config.coordinator.max_shard_size, 4096);
        assert_eq!(config.coordinator.min_shards, 3);
        assert_eq!(config.renter.capacity_bytes, Some(1000));
    }

    #[test]
    fn test_advertised_url_falls_back_to_bind() {
        let renter = RenterConfig {
            bind_addr: "127.0.0.1:9100".parse().unwrap(),
            ..Default::default()
        };
        assert_eq!(renter.advertised_url(), "http://127.0.0.1:9100");
    }
}
