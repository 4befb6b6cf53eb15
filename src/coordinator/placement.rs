//! Sharding and round-robin placement
//!
//! A file is cut into `shard_count` contiguous ranges of `ceil(size / count)`
//! bytes (the last one may be shorter, trailing ones may be empty). Replicas
//! are spread over a snapshot of the active renters taken once per upload.
//! The replicas of shard `i` are taken walking round-robin from slot
//! `(i * k) % n`, where `k = min(replication_factor, n)`, preferring renters
//! on racks the shard does not use yet. When every rack is distinct this is
//! exactly `snapshot[(i * k + j) % n]` for replica `j`.

use crate::common::{Error, Result};
use crate::coordinator::registry::RenterId;
use std::ops::Range;

/// A renter chosen for a shard replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenterTarget {
    pub id: RenterId,
    pub address: String,
    pub rack: u32,
}

/// How one upload is cut into shards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardPlan {
    pub size: u64,
    pub shard_count: u32,
    pub shard_size: u64,
}

impl ShardPlan {
    /// Plan the split of `size` bytes.
    ///
    /// An explicit `requested` count must be at least 1 and large enough that
    /// no shard exceeds `max_shard_size`. Without one the count is
    /// `max(min_shards, ceil(size / max_shard_size))`.
    pub fn new(
        size: u64,
        requested: Option<u32>,
        max_shard_size: u64,
        min_shards: u32,
    ) -> Result<Self> {
        if max_shard_size == 0 {
            return Err(Error::InvalidConfig("max_shard_size must be > 0".into()));
        }

        let needed = size.div_ceil(max_shard_size);
        let shard_count = match requested {
            Some(0) => {
                return Err(Error::Validation("shard count must be at least 1".into()));
            }
            Some(n) if (n as u64) < needed => {
                return Err(Error::Validation(format!(
                    "{} shards would exceed the {} byte shard limit for {} bytes (need {})",
                    n, max_shard_size, size, needed
                )));
            }
            Some(n) => n,
            None => {
                let needed = u32::try_from(needed).map_err(|_| {
                    Error::Validation(format!("{} bytes needs too many shards", size))
                })?;
                needed.max(min_shards.max(1))
            }
        };

        Ok(Self {
            size,
            shard_count,
            shard_size: size.div_ceil(shard_count as u64),
        })
    }

    /// Byte range of shard `index` within the file
    pub fn range(&self, index: u32) -> Range<usize> {
        let start = (index as u64 * self.shard_size).min(self.size);
        let end = (start + self.shard_size).min(self.size);
        start as usize..end as usize
    }

    pub fn ranges(&self) -> impl Iterator<Item = (u32, Range<usize>)> + '_ {
        (0..self.shard_count).map(move |i| (i, self.range(i)))
    }
}

/// Picks renters for shard replicas
#[derive(Debug, Clone)]
pub struct PlacementManager {
    replication_factor: usize,
}

impl PlacementManager {
    pub fn new(replication_factor: usize) -> Self {
        Self {
            replication_factor: replication_factor.max(1),
        }
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// Replicas per shard given `active` renters
    pub fn effective_replicas(&self, active: usize) -> usize {
        self.replication_factor.min(active)
    }

    /// Snapshot positions of the replica targets for shard `index`.
    pub fn positions(&self, index: u32, snapshot: &[RenterTarget]) -> Result<Vec<usize>> {
        let n = snapshot.len();
        if n == 0 {
            return Err(Error::NoRentersAvailable);
        }
        let k = self.effective_replicas(n);
        let start = (index as usize % n) * k % n;

        let mut picked: Vec<usize> = Vec::with_capacity(k);
        let mut racks: Vec<u32> = Vec::with_capacity(k);
        for pos in ring(start, n) {
            if picked.len() == k {
                break;
            }
            if !racks.contains(&snapshot[pos].rack) {
                racks.push(snapshot[pos].rack);
                picked.push(pos);
            }
        }
        for pos in ring(start, n) {
            if picked.len() == k {
                break;
            }
            if !picked.contains(&pos) {
                picked.push(pos);
            }
        }
        Ok(picked)
    }

    /// Candidates for one replica: the snapshot in round-robin order from
    /// `pos`, renters outside `racks_used` first.
    pub fn candidates<'a>(
        &self,
        pos: usize,
        snapshot: &'a [RenterTarget],
        racks_used: &'a [u32],
    ) -> impl Iterator<Item = &'a RenterTarget> + 'a {
        let n = snapshot.len();
        let fresh = ring(pos, n)
            .map(move |i| &snapshot[i])
            .filter(move |t| !racks_used.contains(&t.rack));
        let shared = ring(pos, n)
            .map(move |i| &snapshot[i])
            .filter(move |t| racks_used.contains(&t.rack));
        fresh.chain(shared)
    }

    /// Where to rebuild a lost replica of shard `index`: the first renter in
    /// round-robin order from the shard's slot that is not in `exclude`,
    /// preferring racks outside `racks_used`.
    pub fn replacement<'a>(
        &self,
        index: u32,
        snapshot: &'a [RenterTarget],
        exclude: &[RenterId],
        racks_used: &'a [u32],
    ) -> Option<&'a RenterTarget> {
        if snapshot.is_empty() {
            return None;
        }
        let start = index as usize % snapshot.len();
        self.candidates(start, snapshot, racks_used)
            .find(|t| !exclude.contains(&t.id))
    }
}

/// Positions `start, start + 1, ...` modulo `n`
fn ring(start: usize, n: usize) -> impl Iterator<Item = usize> {
    (0..n).map(move |step| (start + step) % n)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `n` renters, each on its own rack
    fn snapshot(n: u64) -> Vec<RenterTarget> {
        racked(&(0..n as u32).collect::<Vec<_>>())
    }

    fn racked(racks: &[u32]) -> Vec<RenterTarget> {
        racks
            .iter()
            .enumerate()
            .map(|(i, rack)| RenterTarget {
                id: RenterId(i as u64 + 1),
                address: format!("http://r{}", i + 1),
                rack: *rack,
            })
            .collect()
    }

    fn ids(targets: &[RenterTarget]) -> Vec<u64> {
        targets.iter().map(|t| t.id.0).collect()
    }

    /// Replica targets for shard `index`
    fn select(
        placement: &PlacementManager,
        index: u32,
        snapshot: &[RenterTarget],
    ) -> Result<Vec<RenterTarget>> {
        Ok(placement
            .positions(index, snapshot)?
            .into_iter()
            .map(|pos| snapshot[pos].clone())
            .collect())
    }

    #[test]
    fn test_plan_even_split() {
        let plan = ShardPlan::new(30_000, Some(3), 1024 * 1024, 3).unwrap();
        assert_eq!(plan.shard_count, 3);
        assert_eq!(plan.shard_size, 10_000);
        let ranges: Vec<_> = plan.ranges().map(|(_, r)| r).collect();
        assert_eq!(ranges, vec![0..10_000, 10_000..20_000, 20_000..30_000]);
    }

    #[test]
    fn test_plan_last_shard_shorter_and_empty_tail() {
        let plan = ShardPlan::new(10, Some(4), 1024, 1).unwrap();
        assert_eq!(plan.shard_size, 3);
        let ranges: Vec<_> = plan.ranges().map(|(_, r)| r).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..9, 9..10]);

        let tiny = ShardPlan::new(2, Some(4), 1024, 1).unwrap();
        let lens: Vec<_> = tiny.ranges().map(|(_, r)| r.len()).collect();
        assert_eq!(lens, vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_plan_default_count() {
        // Small files use the minimum
        let plan = ShardPlan::new(100, None, 1024, 3).unwrap();
        assert_eq!(plan.shard_count, 3);

        // Large files grow with the shard size limit
        let plan = ShardPlan::new(10 * 1024 + 1, None, 1024, 3).unwrap();
        assert_eq!(plan.shard_count, 11);
        assert!(plan.shard_size <= 1024);

        let empty = ShardPlan::new(0, None, 1024, 3).unwrap();
        assert_eq!(empty.shard_count, 3);
        assert!(empty.ranges().all(|(_, r)| r.is_empty()));
    }

    #[test]
    fn test_plan_rejects_bad_counts() {
        assert!(matches!(
            ShardPlan::new(100, Some(0), 1024, 3),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            ShardPlan::new(4096, Some(2), 1024, 3),
            Err(Error::Validation(_))
        ));
        assert!(ShardPlan::new(4096, Some(4), 1024, 3).is_ok());
    }

    #[test]
    fn test_round_robin_wraps() {
        let placement = PlacementManager::new(1);
        let renters = snapshot(2);
        let picks: Vec<RenterId> = (0..3)
            .map(|i| select(&placement, i, &renters).unwrap()[0].id)
            .collect();
        assert_eq!(picks, vec![RenterId(1), RenterId(2), RenterId(1)]);
    }

    #[test]
    fn test_replicas_are_distinct_and_capped() {
        let placement = PlacementManager::new(3);
        let renters = snapshot(2);
        for i in 0..5 {
            let picks = select(&placement, i, &renters).unwrap();
            assert_eq!(picks.len(), 2);
            assert_ne!(picks[0].id, picks[1].id);
        }

        let renters = snapshot(4);
        let placement = PlacementManager::new(2);
        assert_eq!(placement.positions(0, &renters).unwrap(), vec![0, 1]);
        assert_eq!(placement.positions(1, &renters).unwrap(), vec![2, 3]);
        assert_eq!(placement.positions(2, &renters).unwrap(), vec![0, 1]);
        assert_eq!(select(&placement, 1, &renters).unwrap()[0].id, RenterId(3));
    }

    #[test]
    fn test_no_renters() {
        let placement = PlacementManager::new(1);
        assert!(matches!(
            select(&placement, 0, &[]),
            Err(Error::NoRentersAvailable)
        ));
    }

    #[test]
    fn test_candidates_start_at_primary() {
        let placement = PlacementManager::new(1);
        let renters = snapshot(3);
        let order: Vec<RenterId> = placement
            .candidates(1, &renters, &[])
            .map(|t| t.id)
            .collect();
        assert_eq!(order, vec![RenterId(2), RenterId(3), RenterId(1)]);

        // Renters on racks already holding the shard go last
        let order: Vec<RenterId> = placement
            .candidates(1, &renters, &[1])
            .map(|t| t.id)
            .collect();
        assert_eq!(order, vec![RenterId(3), RenterId(1), RenterId(2)]);
    }

    #[test]
    fn test_replicas_spread_over_racks() {
        let placement = PlacementManager::new(2);
        // r1 and r2 share rack 0
        let renters = racked(&[0, 0, 1, 2]);
        assert_eq!(ids(&select(&placement, 0, &renters).unwrap()), vec![1, 3]);
        assert_eq!(ids(&select(&placement, 1, &renters).unwrap()), vec![3, 4]);

        let placement = PlacementManager::new(3);
        let renters = racked(&[0, 0, 1, 1, 2, 2]);
        assert_eq!(ids(&select(&placement, 0, &renters).unwrap()), vec![1, 3, 5]);
        assert_eq!(ids(&select(&placement, 1, &renters).unwrap()), vec![4, 5, 1]);
    }

    #[test]
    fn test_single_rack_falls_back_to_round_robin() {
        let placement = PlacementManager::new(2);
        let renters = racked(&[0, 0, 0]);
        assert_eq!(ids(&select(&placement, 0, &renters).unwrap()), vec![1, 2]);
        assert_eq!(ids(&select(&placement, 1, &renters).unwrap()), vec![3, 1]);
    }

    #[test]
    fn test_replacement_skips_holders() {
        let placement = PlacementManager::new(2);
        let renters = snapshot(3);
        let pick = placement
            .replacement(0, &renters, &[RenterId(1), RenterId(2)], &[])
            .unwrap();
        assert_eq!(pick.id, RenterId(3));
        assert!(placement
            .replacement(0, &renters, &[RenterId(1), RenterId(2), RenterId(3)], &[])
            .is_none());

        // The survivor's rack is avoided when another is free
        let renters = racked(&[0, 0, 1]);
        let pick = placement
            .replacement(0, &renters, &[RenterId(1)], &[0])
            .unwrap();
        assert_eq!(pick.id, RenterId(3));
    }
}
