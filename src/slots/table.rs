//! Reshard planning - computes which slots move where, no I/O.
//!
//! Planners here are pure: the same topology input always produces
//! byte-identical output, which the test suite leans on.

use thiserror::Error;

use crate::client::types::NodeInfo;
use crate::client::uri::RedisUri;

/// Total number of hash slots in a Redis cluster.
pub const TOTAL_SLOTS: u16 = 16384;

/// Reasons a reshard plan cannot be built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReshardTableError {
    #[error("reshard requires at least one source master")]
    NoSources,
    #[error("source master {0} owns no slots")]
    EmptySource(String),
    #[error("no masters left to receive slots")]
    NoDestinations,
}

/// Slots one source master hands to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMove {
    pub source: String,
    pub dest: String,
    /// Ascending slot numbers.
    pub slots: Vec<u16>,
}

/// A single slot's migration, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationJob {
    pub slot: u16,
    pub source: String,
    pub dest: String,
    pub dest_uri: RedisUri,
}

/// Complete plan for one reshard, moves in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReshardTable {
    pub moves: Vec<SlotMove>,
}

impl ReshardTable {
    /// Plan a rebalance toward `target_id`.
    ///
    /// Each master should own roughly `16384 / (sources + 1)` slots after
    /// the reshard; every source relinquishes its lowest-numbered surplus
    /// slots. The target never appears as a source.
    pub fn expand(sources: &[&NodeInfo], target_id: &str) -> Result<Self, ReshardTableError> {
        let sources: Vec<&NodeInfo> = sources.iter().copied().filter(|s| s.id != target_id).collect();
        if sources.is_empty() {
            return Err(ReshardTableError::NoSources);
        }

        let ideal = (TOTAL_SLOTS as usize).div_ceil(sources.len() + 1);
        let mut moves = Vec::new();

        for source in &sources {
            let mut owned = source.owned_slots();
            if owned.is_empty() {
                return Err(ReshardTableError::EmptySource(source.id.clone()));
            }

            let surplus = owned.len().saturating_sub(ideal);
            if surplus == 0 {
                continue;
            }
            owned.truncate(surplus);
            moves.push(SlotMove {
                source: source.id.clone(),
                dest: target_id.to_string(),
                slots: owned,
            });
        }

        Ok(Self { moves })
    }

    /// Plan the evacuation of a departing master: its slots are spread
    /// round-robin across the remaining masters.
    pub fn drain(departing: &NodeInfo, remaining: &[&NodeInfo]) -> Result<Self, ReshardTableError> {
        let remaining: Vec<&NodeInfo> = remaining
            .iter()
            .copied()
            .filter(|m| m.id != departing.id)
            .collect();
        if remaining.is_empty() {
            return Err(ReshardTableError::NoDestinations);
        }

        let mut buckets: Vec<Vec<u16>> = vec![Vec::new(); remaining.len()];
        for (i, slot) in departing.owned_slots().into_iter().enumerate() {
            if let Some(bucket) = buckets.get_mut(i % remaining.len()) {
                bucket.push(slot);
            }
        }

        let moves = remaining
            .iter()
            .zip(buckets)
            .filter(|(_, slots)| !slots.is_empty())
            .map(|(dest, slots)| SlotMove {
                source: departing.id.clone(),
                dest: dest.id.clone(),
                slots,
            })
            .collect();

        Ok(Self { moves })
    }

    pub fn is_empty(&self) -> bool {
        self.moves.iter().all(|m| m.slots.is_empty())
    }

    pub fn total_slots(&self) -> usize {
        self.moves.iter().map(|m| m.slots.len()).sum()
    }

    /// Flatten into per-slot jobs, destination addresses resolved against
    /// the topology the plan was built from.
    pub fn jobs(&self, topology: &[NodeInfo]) -> Vec<MigrationJob> {
        let mut jobs = Vec::with_capacity(self.total_slots());
        for mv in &self.moves {
            let Some(dest_uri) = topology
                .iter()
                .find(|n| n.id == mv.dest)
                .map(|n| n.uri.clone())
            else {
                continue;
            };
            for &slot in &mv.slots {
                jobs.push(MigrationJob {
                    slot,
                    source: mv.source.clone(),
                    dest: mv.dest.clone(),
                    dest_uri: dest_uri.clone(),
                });
            }
        }
        jobs
    }
}
