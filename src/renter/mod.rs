//! Renter node: shard storage plus liveness toward the coordinator

pub mod agent;
pub mod http;
pub mod server;
pub mod store;

pub use agent::HeartbeatAgent;
pub use server::RenterServer;
pub use store::{ShardStore, StoreStats};
