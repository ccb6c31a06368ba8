//! # Participant Rebalancing
//!
//! Pluggable policies that redistribute participants across the shards
//! of one channel. The registry checks the result; a policy only
//! proposes.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{Participant, ShardId};

/// Participant assignment per shard.
pub type Assignment = BTreeMap<ShardId, Vec<Participant>>;

/// Rebalancing policy.
pub trait RebalancePolicy: Send + Sync {
    /// Propose a new assignment for the same shard set.
    fn rebalance(&self, current: &Assignment) -> Assignment;

    /// Policy name for audit records.
    fn name(&self) -> &'static str;
}

/// Deals the sorted union of participants across shards in id order.
///
/// With fewer participants than shards, participants are reused so
/// every shard keeps at least one.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoundRobinPolicy;

impl RebalancePolicy for RoundRobinPolicy {
    fn rebalance(&self, current: &Assignment) -> Assignment {
        let pool: Vec<Participant> = current
            .values()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut next: Assignment = current.keys().map(|id| (id.clone(), Vec::new())).collect();
        if pool.is_empty() || next.is_empty() {
            return next;
        }

        let shard_ids: Vec<ShardId> = next.keys().cloned().collect();
        if pool.len() >= shard_ids.len() {
            for (i, participant) in pool.into_iter().enumerate() {
                let shard = &shard_ids[i % shard_ids.len()];
                if let Some(slot) = next.get_mut(shard) {
                    slot.push(participant);
                }
            }
        } else {
            for (i, shard) in shard_ids.iter().enumerate() {
                if let Some(slot) = next.get_mut(shard) {
                    slot.push(pool[i % pool.len()].clone());
                }
            }
        }

        next
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Leaves the assignment untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticPolicy;

impl RebalancePolicy for StaticPolicy {
    fn rebalance(&self, current: &Assignment) -> Assignment {
        current.clone()
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(entries: &[(&str, &[&str])]) -> Assignment {
        entries
            .iter()
            .map(|(id, ps)| {
                (
                    ShardId::from(*id),
                    ps.iter().map(|p| p.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_round_robin_spreads_load() {
        let current = assignment(&[("s1", &["a", "b", "c", "d"]), ("s2", &[])]);
        let next = RoundRobinPolicy.rebalance(&current);

        assert_eq!(next[&ShardId::from("s1")], vec!["a", "c"]);
        assert_eq!(next[&ShardId::from("s2")], vec!["b", "d"]);
    }

    #[test]
    fn test_round_robin_deduplicates() {
        let current = assignment(&[("s1", &["a", "b"]), ("s2", &["a", "b"])]);
        let next = RoundRobinPolicy.rebalance(&current);

        let total: usize = next.values().map(Vec::len).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_round_robin_reuses_when_short() {
        let current = assignment(&[("s1", &["a"]), ("s2", &[]), ("s3", &[])]);
        let next = RoundRobinPolicy.rebalance(&current);

        for participants in next.values() {
            assert_eq!(participants, &vec!["a".to_string()]);
        }
    }

    #[test]
    fn test_round_robin_keeps_shard_set() {
        let current = assignment(&[("s1", &[]), ("s2", &[])]);
        let next = RoundRobinPolicy.rebalance(&current);
        assert_eq!(next.len(), 2);
        assert!(next.values().all(Vec::is_empty));
    }

    #[test]
    fn test_static_policy_is_identity() {
        let current = assignment(&[("s1", &["x"])]);
        assert_eq!(StaticPolicy.rebalance(&current), current);
    }
}
