//! # Inbound Ports
//!
//! API traits defining what the State Partitioning subsystem can do.
//! None of these operations retry internally.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::algorithms::Assignment;
use crate::domain::{
    ChannelId, Fragment, Participant, PartitionError, Shard, ShardId, StateMap, StateValue,
};

/// Outcome of a committed reallocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReallocationReceipt {
    /// Transaction identifier.
    pub transaction_id: Uuid,
    /// Shard moved.
    pub shard_id: ShardId,
    /// Previous owner.
    pub source: ChannelId,
    /// New owner.
    pub target: ChannelId,
    /// Commit timestamp (ms).
    pub completed_at: u64,
}

/// Fragmentation API - inbound port.
#[async_trait]
pub trait FragmentationApi: Send + Sync {
    /// Split `data` into `count` encrypted fragments.
    async fn fragment(
        &self,
        channel_id: &ChannelId,
        data: &[u8],
        count: usize,
    ) -> Result<Vec<Fragment>, PartitionError>;

    /// Rebuild the blob from a complete fragment set.
    async fn reassemble(
        &self,
        channel_id: &ChannelId,
        fragments: &BTreeMap<u32, Fragment>,
        expected_count: u32,
    ) -> Result<Vec<u8>, PartitionError>;
}

/// Shard registry API - inbound port. One registry per channel.
#[async_trait]
pub trait ShardRegistryApi: Send + Sync {
    /// Create a shard with empty state.
    async fn create_shard(
        &self,
        id: ShardId,
        participants: Vec<Participant>,
    ) -> Result<Shard, PartitionError>;

    /// Clear a shard's state and mark it closed.
    async fn close_shard(&self, id: &ShardId) -> Result<(), PartitionError>;

    /// Write one key of a shard's state.
    async fn update_shard_state(
        &self,
        id: &ShardId,
        key: String,
        value: StateValue,
    ) -> Result<(), PartitionError>;

    /// Merge active shards into the channel aggregate.
    async fn sync_shards(&self) -> Result<StateMap, PartitionError>;

    /// Redistribute participants across shards.
    async fn rebalance_shards(&self) -> Result<Assignment, PartitionError>;

    /// Sync, close every shard, then close the channel.
    async fn close_channel(&self) -> Result<(), PartitionError>;

    /// Snapshot of one shard.
    async fn get_shard(&self, id: &ShardId) -> Option<Shard>;

    /// Snapshot of the channel aggregate state.
    async fn channel_state(&self) -> StateMap;
}

/// Fractal composition API - inbound port.
#[async_trait]
pub trait CompositionApi: Send + Sync {
    /// Open a detached channel in the arena.
    async fn open_channel(
        &self,
        id: ChannelId,
        participants: Vec<Participant>,
    ) -> Result<(), PartitionError>;

    /// Attach `child` under `parent`.
    async fn add_child(&self, parent: &ChannelId, child: &ChannelId)
        -> Result<(), PartitionError>;

    /// Aggregate the subtree bottom-up; returns the node's state.
    async fn sync_state(&self, id: &ChannelId) -> Result<StateMap, PartitionError>;

    /// Close the subtree, children first.
    async fn close(&self, id: &ChannelId) -> Result<(), PartitionError>;

    /// Broadcast a write to the node and every descendant; returns the
    /// number of nodes written.
    async fn update_state(
        &self,
        id: &ChannelId,
        key: String,
        value: StateValue,
    ) -> Result<usize, PartitionError>;

    /// Validate the subtree.
    async fn validate(&self, id: &ChannelId) -> Result<(), PartitionError>;
}

/// Reallocation API - inbound port.
#[async_trait]
pub trait ReallocationApi: Send + Sync {
    /// Allocate a shard carrying an encrypted payload in the source channel.
    async fn allocate_shard(&self, id: ShardId, payload: &[u8]) -> Result<Shard, PartitionError>;

    /// Move a shard from the source channel to `target`.
    async fn reallocate_shard(
        &self,
        id: &ShardId,
        target: &ChannelId,
    ) -> Result<ReallocationReceipt, PartitionError>;

    /// One leveling pass; returns the moves committed.
    async fn run_monitor_pass(&self) -> Vec<ReallocationReceipt>;
}
