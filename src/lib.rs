//! # shardfs
//!
//! Sharded file storage over a fleet of unreliable renter nodes:
//! - A single coordinator tracks renter liveness through heartbeats
//! - Files are cut into shards and spread round-robin over active renters
//! - Optional replication, with re-replication when a renter is evicted
//! - Uploads commit atomically or roll back every stored shard
//! - Downloads stream shards back in order with a bounded working set
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            ┌──────────────────────────────┐
//!  client ──►│         Coordinator          │
//!            │  registry · file table (sled)│
//!            │  placement · liveness sweep  │
//!            └──────┬──────────┬────────┬───┘
//!                   │ HTTP     │        │
//!            ┌──────▼───┐ ┌────▼─────┐ ┌▼─────────┐
//!            │ Renter 1 │ │ Renter 2 │ │ Renter 3 │
//!            │  shards  │ │  shards  │ │  shards  │
//!            └──────────┘ └──────────┘ └──────────┘
//!              heartbeats ───────────────► coordinator
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! shardfs-coord serve --bind 0.0.0.0:8000 --db ./coord-data --replication 2
//! ```
//!
//! ### Start renters
//! ```bash
//! shardfs-renter serve --bind 0.0.0.0:8001 --data ./renter-1 \
//!   --coordinator http://localhost:8000
//! ```
//!
//! ### Use the CLI
//! ```bash
//! shardfs upload ./report.pdf --shards 4 --ttl 7d
//! shardfs download report.pdf --output ./copy.pdf
//! shardfs list
//! shardfs renters
//! shardfs verify
//! shardfs delete report.pdf
//! ```

pub mod common;
pub mod coordinator;
pub mod renter;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{ControlPlane, Coordinator};
pub use renter::RenterServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
