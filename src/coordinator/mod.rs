//! Coordinator implementation
//!
//! The coordinator is responsible for:
//! - Renter membership and liveness (register, heartbeat, sweep)
//! - Sharding and rack-aware round-robin placement
//! - Upload orchestration with compensating rollback
//! - Ordered, bounded-memory reconstruction
//! - Redistribution after eviction, and TTL expiry

pub mod control;
pub mod download;
pub mod files;
pub mod http;
pub mod metadata;
pub mod monitor;
pub mod placement;
pub mod recovery;
pub mod registry;
pub mod server;
pub mod transport;
pub mod upload;

pub use control::{ControlPlane, DeleteOutcome, RenterView};
pub use download::{Download, ShardStream};
pub use files::{FileRecord, FileStatus, FileSummary, ShardAssignment};
pub use metadata::MetadataStore;
pub use monitor::LivenessMonitor;
pub use recovery::{MaintenanceReport, RedistributionReport};
pub use registry::{RenterId, RenterInfo, RenterStatus};
pub use server::Coordinator;
pub use transport::{HttpRenterClient, ShardKey, ShardTransport};
pub use upload::{UploadOptions, MAX_TTL};
