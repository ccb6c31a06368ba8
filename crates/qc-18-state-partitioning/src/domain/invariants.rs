//! # Domain Invariants
//!
//! Rules that must always hold for channel partitioning.

use std::collections::BTreeSet;

use super::errors::PartitionError;
use super::value_objects::{ChannelId, Participant, ShardId};

/// Minimum fragments per session.
pub const MIN_FRAGMENT_COUNT: usize = 1;

/// Default upper bound on fragments per session.
pub const DEFAULT_MAX_FRAGMENT_COUNT: usize = 1024;

/// Invariant: a fragment set is reconstructible only with every index
/// in `[0, expected)` present.
pub fn invariant_complete_fragment_set<I>(present: I, expected: u32) -> Result<(), PartitionError>
where
    I: IntoIterator<Item = u32>,
{
    let present: BTreeSet<u32> = present.into_iter().collect();
    let missing: Vec<u32> = (0..expected).filter(|i| !present.contains(i)).collect();

    if !missing.is_empty() {
        return Err(PartitionError::IncompleteFragmentSet { missing, expected });
    }
    Ok(())
}

/// Invariant: a shard is owned by exactly one channel.
///
/// `owners` lists every channel currently holding `shard`.
pub fn invariant_exclusive_ownership(
    shard: &ShardId,
    owners: &[ChannelId],
) -> Result<(), PartitionError> {
    match owners.len() {
        1 => Ok(()),
        0 => Err(PartitionError::ShardNotFound(shard.clone())),
        _ => Err(PartitionError::InvalidArgument(format!(
            "Shard {} owned by {} channels",
            shard,
            owners.len()
        ))),
    }
}

/// Invariant: rebalancing never loses a participant.
pub fn invariant_no_participant_dropped<'a, B, A>(before: B, after: A) -> Result<(), PartitionError>
where
    B: IntoIterator<Item = &'a Participant>,
    A: IntoIterator<Item = &'a Participant>,
{
    let after: BTreeSet<&Participant> = after.into_iter().collect();
    for participant in before {
        if !after.contains(participant) {
            return Err(PartitionError::ParticipantDropped(participant.clone()));
        }
    }
    Ok(())
}

/// Invariant: the composition tree stays acyclic.
///
/// `parent_lineage` is the parent followed by all of its ancestors.
pub fn invariant_acyclic(
    parent: &ChannelId,
    child: &ChannelId,
    parent_lineage: &[ChannelId],
) -> Result<(), PartitionError> {
    if parent == child || parent_lineage.contains(child) {
        return Err(PartitionError::CycleDetected {
            parent: parent.clone(),
            child: child.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_set_passes() {
        assert!(invariant_complete_fragment_set([2, 0, 1], 3).is_ok());
    }

    #[test]
    fn test_gapped_set_reports_missing() {
        let err = invariant_complete_fragment_set([0, 2], 4).unwrap_err();
        match err {
            PartitionError::IncompleteFragmentSet { missing, expected } => {
                assert_eq!(missing, vec![1, 3]);
                assert_eq!(expected, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_exclusive_ownership() {
        let shard = ShardId::from("s1");
        assert!(invariant_exclusive_ownership(&shard, &[ChannelId::from("a")]).is_ok());
        assert!(invariant_exclusive_ownership(&shard, &[]).is_err());
        assert!(invariant_exclusive_ownership(
            &shard,
            &[ChannelId::from("a"), ChannelId::from("b")]
        )
        .is_err());
    }

    #[test]
    fn test_participant_dropped_detected() {
        let before = vec!["a".to_string(), "b".to_string()];
        let after = vec!["a".to_string()];
        assert!(matches!(
            invariant_no_participant_dropped(&before, &after),
            Err(PartitionError::ParticipantDropped(p)) if p == "b"
        ));
        assert!(invariant_no_participant_dropped(&after, &before).is_ok());
    }

    #[test]
    fn test_self_attachment_is_cycle() {
        let id = ChannelId::from("root");
        assert!(invariant_acyclic(&id, &id, &[]).is_err());
    }

    #[test]
    fn test_ancestor_attachment_is_cycle() {
        let parent = ChannelId::from("leaf");
        let child = ChannelId::from("root");
        let lineage = vec![parent.clone(), ChannelId::from("mid"), child.clone()];
        assert!(invariant_acyclic(&parent, &child, &lineage).is_err());
        assert!(invariant_acyclic(&parent, &ChannelId::from("other"), &lineage).is_ok());
    }
}
