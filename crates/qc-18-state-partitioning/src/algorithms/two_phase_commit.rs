//! # Reallocation Two-Phase Commit
//!
//! Tracks one cross-channel shard move. Phase 1 is the network transfer
//! (prepare); phase 2 moves registry membership (commit). The caller
//! holds both channel locks across both phases.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ChannelId, PartitionError, ReallocationState, ShardId};

/// One in-flight reallocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReallocationTransaction {
    /// Transaction identifier, carried into both audit records.
    pub id: Uuid,
    /// Shard being moved.
    pub shard_id: ShardId,
    /// Current owner.
    pub source: ChannelId,
    /// New owner.
    pub target: ChannelId,
    /// Current state.
    pub state: ReallocationState,
    /// Abort reason, if aborted.
    pub abort_reason: Option<String>,
    /// Start timestamp (ms).
    pub started_at: u64,
}

impl ReallocationTransaction {
    /// Begin a new reallocation.
    pub fn new(shard_id: ShardId, source: ChannelId, target: ChannelId, started_at: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            shard_id,
            source,
            target,
            state: ReallocationState::Pending,
            abort_reason: None,
            started_at,
        }
    }

    fn transition_to(&mut self, next: ReallocationState) -> Result<(), PartitionError> {
        if !self.state.can_transition_to(next) {
            return Err(PartitionError::InvalidTransition {
                from: format!("{:?}", self.state),
                to: format!("{:?}", next),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Phase 1 complete: data transferred.
    pub fn prepare(&mut self) -> Result<(), PartitionError> {
        self.transition_to(ReallocationState::Prepared)
    }

    /// Phase 2 complete: ownership moved.
    pub fn commit(&mut self) -> Result<(), PartitionError> {
        self.transition_to(ReallocationState::Committed)
    }

    /// Abort with reason.
    pub fn abort(&mut self, reason: impl Into<String>) -> Result<(), PartitionError> {
        self.transition_to(ReallocationState::Aborted)?;
        self.abort_reason = Some(reason.into());
        Ok(())
    }

    /// Check if the move completed.
    pub fn is_committed(&self) -> bool {
        self.state == ReallocationState::Committed
    }
}
