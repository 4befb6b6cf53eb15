//! Renter registry and liveness tracking
//!
//! Every renter that registers gets a fresh [`RenterId`]. Heartbeats keep it
//! `Active`; the liveness sweep demotes silent renters to `Suspected` and
//! finally `Removed`. `Removed` is terminal: a returning renter must register
//! again and receives a new id.
//!
//! Each renter sits in a rack, either advertised at registration or assigned
//! round-robin by registration order. Placement uses racks to keep a shard's
//! replicas apart.
//!
//! Entries live in a [`DashMap`] so heartbeats from different renters only
//! contend on their own entry. The sweep never holds more than one entry lock
//! at a time: it snapshots timestamps, decides, then re-checks each decision
//! under that renter's lock before applying it.

use crate::common::{timestamp_now_millis, Error, Result};
use crate::coordinator::placement::RenterTarget;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenterId(pub u64);

impl std::fmt::Display for RenterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "renter-{}", self.0)
    }
}

/// Renter health state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenterStatus {
    Active,
    Suspected,
    Removed,
}

impl RenterStatus {
    /// Eligible for new shard placement?
    pub fn is_active(&self) -> bool {
        matches!(self, RenterStatus::Active)
    }

    /// Still expected to hold its shards?
    pub fn holds_data(&self) -> bool {
        !matches!(self, RenterStatus::Removed)
    }
}

impl std::fmt::Display for RenterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenterStatus::Active => write!(f, "active"),
            RenterStatus::Suspected => write!(f, "suspected"),
            RenterStatus::Removed => write!(f, "removed"),
        }
    }
}

/// Persisted view of a renter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenterInfo {
    pub id: RenterId,
    pub address: String,
    pub capacity_bytes: Option<u64>,
    pub rack: u32,
    pub status: RenterStatus,
    pub registered_at: u64,
    pub last_heartbeat_ms: u64,
}

#[derive(Debug, Clone)]
struct RenterEntry {
    info: RenterInfo,
    last_seen: Instant,
}

/// A status change applied by the sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub id: RenterId,
    pub from: RenterStatus,
    pub to: RenterStatus,
}

pub struct RenterRegistry {
    renters: DashMap<RenterId, RenterEntry>,
    next_id: AtomicU64,
    heartbeat_timeout: Duration,
    eviction_timeout: Duration,
    rack_count: u32,
}

impl RenterRegistry {
    pub fn new(heartbeat_timeout: Duration, eviction_timeout: Duration, rack_count: u32) -> Self {
        Self {
            renters: DashMap::new(),
            next_id: AtomicU64::new(1),
            heartbeat_timeout,
            eviction_timeout,
            rack_count: rack_count.max(1),
        }
    }

    /// Reload persisted renters after a coordinator restart.
    ///
    /// Known renters come back `Suspected` with a fresh timestamp: they keep
    /// their shards if they heartbeat before `eviction_timeout`, and are
    /// evicted through the normal sweep otherwise.
    pub fn restore(&self, renters: Vec<RenterInfo>, next_id: u64, now: Instant) {
        let mut max_seen = next_id;
        for mut info in renters {
            max_seen = max_seen.max(info.id.0 + 1);
            if info.status.holds_data() {
                info.status = RenterStatus::Suspected;
            }
            self.renters.insert(
                info.id,
                RenterEntry {
                    info,
                    last_seen: now,
                },
            );
        }
        self.next_id.fetch_max(max_seen, Ordering::SeqCst);
    }

    /// Next id that will be handed out (persisted so ids are never reused)
    pub fn next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Add a renter. Without an advertised `rack` it is assigned one
    /// round-robin by registration order.
    pub fn register(
        &self,
        address: String,
        capacity_bytes: Option<u64>,
        rack: Option<u32>,
    ) -> RenterInfo {
        let id = RenterId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let rack = rack.unwrap_or(((id.0 - 1) % u64::from(self.rack_count)) as u32);
        let now_ms = timestamp_now_millis();
        let info = RenterInfo {
            id,
            address,
            capacity_bytes,
            rack,
            status: RenterStatus::Active,
            registered_at: now_ms,
            last_heartbeat_ms: now_ms,
        };
        self.renters.insert(
            id,
            RenterEntry {
                info: info.clone(),
                last_seen: Instant::now(),
            },
        );
        info
    }

    /// Record a heartbeat. Returns the previous status.
    pub fn heartbeat(&self, id: RenterId) -> Result<RenterStatus> {
        self.heartbeat_at(id, Instant::now())
    }

    pub fn heartbeat_at(&self, id: RenterId, now: Instant) -> Result<RenterStatus> {
        let mut entry = self
            .renters
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("{} is not registered", id)))?;

        let previous = entry.info.status;
        if previous == RenterStatus::Removed {
            return Err(Error::NotFound(format!(
                "{} was removed, register again",
                id
            )));
        }

        if now > entry.last_seen {
            entry.last_seen = now;
        }
        entry.info.last_heartbeat_ms = timestamp_now_millis();
        entry.info.status = RenterStatus::Active;
        Ok(previous)
    }

    pub fn get(&self, id: RenterId) -> Option<RenterInfo> {
        self.renters.get(&id).map(|e| e.info.clone())
    }

    pub fn status(&self, id: RenterId) -> Option<RenterStatus> {
        self.renters.get(&id).map(|e| e.info.status)
    }

    /// Unknown or removed renters no longer hold anything we can read.
    pub fn is_lost(&self, id: RenterId) -> bool {
        self.status(id).map(|s| !s.holds_data()).unwrap_or(true)
    }

    pub fn address(&self, id: RenterId) -> Option<String> {
        self.renters.get(&id).map(|e| e.info.address.clone())
    }

    pub fn rack(&self, id: RenterId) -> Option<u32> {
        self.renters.get(&id).map(|e| e.info.rack)
    }

    /// Active renter ids in ascending order.
    pub fn list_active(&self) -> Vec<RenterId> {
        self.active_snapshot().into_iter().map(|t| t.id).collect()
    }

    /// Active renters as placement targets, ascending by id.
    pub fn active_snapshot(&self) -> Vec<RenterTarget> {
        let mut active: Vec<RenterTarget> = self
            .renters
            .iter()
            .filter(|e| e.info.status.is_active())
            .map(|e| RenterTarget {
                id: e.info.id,
                address: e.info.address.clone(),
                rack: e.info.rack,
            })
            .collect();
        active.sort_by_key(|t| t.id);
        active
    }

    pub fn list(&self) -> Vec<RenterInfo> {
        let mut all: Vec<RenterInfo> = self.renters.iter().map(|e| e.info.clone()).collect();
        all.sort_by_key(|info| info.id);
        all
    }

    /// Time since the last heartbeat
    pub fn silence(&self, id: RenterId) -> Option<Duration> {
        self.renters
            .get(&id)
            .map(|e| Instant::now().saturating_duration_since(e.last_seen))
    }

    pub fn sweep(&self) -> Vec<Transition> {
        self.sweep_at(Instant::now())
    }

    /// Apply timeout-driven transitions as of `now`.
    pub fn sweep_at(&self, now: Instant) -> Vec<Transition> {
        let snapshot: Vec<(RenterId, Instant, RenterStatus)> = self
            .renters
            .iter()
            .filter(|e| e.info.status.holds_data())
            .map(|e| (e.info.id, e.last_seen, e.info.status))
            .collect();

        let mut transitions = Vec::new();
        for (id, last_seen, status) in snapshot {
            if self.decide(status, last_seen, now).is_none() {
                continue;
            }

            let Some(mut entry) = self.renters.get_mut(&id) else {
                continue;
            };
            // A heartbeat may have landed since the snapshot.
            let current = entry.info.status;
            if let Some(to) = self.decide(current, entry.last_seen, now) {
                entry.info.status = to;
                transitions.push(Transition {
                    id,
                    from: current,
                    to,
                });
            }
        }
        transitions
    }

    fn decide(&self, status: RenterStatus, last_seen: Instant, now: Instant) -> Option<RenterStatus> {
        let silence = now.saturating_duration_since(last_seen);
        match status {
            RenterStatus::Removed => None,
            _ if silence >= self.eviction_timeout => Some(RenterStatus::Removed),
            RenterStatus::Active if silence >= self.heartbeat_timeout => {
                Some(RenterStatus::Suspected)
            }
            _ => None,
        }
    }
}
