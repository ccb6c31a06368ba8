//! # Domain Entities
//!
//! Channels, shards and fragments.
//!
//! Shards and fragments share the [`Partition`] shape: an identified,
//! timestamped, optionally encrypted unit of channel state.

use serde::{Deserialize, Serialize};

use super::errors::{Hash, PartitionError};
use super::value_objects::{
    ChannelId, ChannelStatus, FragmentId, Participant, ShardId, ShardStatus, StateMap, StateValue,
};

/// Common shape of shards and fragments.
pub trait Partition {
    /// Identifier used when moving the partition between channels.
    fn partition_id(&self) -> &str;

    /// Channel currently owning the partition.
    fn owner(&self) -> &ChannelId;

    /// Last-modified (shards) or creation (fragments) timestamp in ms.
    fn timestamp(&self) -> u64;

    /// Whether the partition carries an encrypted payload.
    fn is_encrypted(&self) -> bool;
}

/// A named partition of a channel's state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shard {
    /// Identifier, unique within the owning channel.
    pub id: ShardId,
    /// Owning channel.
    pub owner: ChannelId,
    /// Participant subset serving this shard.
    pub participants: Vec<Participant>,
    /// Local state.
    pub state: StateMap,
    /// Lifecycle status.
    pub status: ShardStatus,
    /// Encrypted snapshot of the state at creation.
    pub sealed_snapshot: Vec<u8>,
    /// Encrypted payload supplied at allocation.
    pub payload: Option<Vec<u8>>,
    /// Last-modified timestamp (ms).
    pub last_modified: u64,
    /// Set once the shard has been moved to another channel.
    pub reallocated: bool,
}

impl Shard {
    /// Create a new shard in `Created` status with empty state.
    pub fn new(
        id: ShardId,
        owner: ChannelId,
        participants: Vec<Participant>,
        sealed_snapshot: Vec<u8>,
        now: u64,
    ) -> Self {
        Self {
            id,
            owner,
            participants,
            state: StateMap::new(),
            status: ShardStatus::Created,
            sealed_snapshot,
            payload: None,
            last_modified: now,
            reallocated: false,
        }
    }

    /// Transition to a new status.
    pub fn transition_to(&mut self, next: ShardStatus) -> Result<(), PartitionError> {
        if !self.status.can_transition_to(next) {
            return Err(PartitionError::InvalidTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", next),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Fail with `ShardClosed` once the shard is terminal.
    pub fn ensure_open(&self) -> Result<(), PartitionError> {
        if self.is_closed() {
            return Err(PartitionError::ShardClosed(self.id.clone()));
        }
        Ok(())
    }

    /// Write one state key, activating the shard.
    pub fn write(&mut self, key: String, value: StateValue, now: u64) -> Result<(), PartitionError> {
        self.ensure_open()?;
        self.transition_to(ShardStatus::Active)?;
        self.state.insert(key, value);
        self.last_modified = now;
        Ok(())
    }

    /// Clear state and move to `Closed`. The shard stays registered.
    pub fn close(&mut self, now: u64) -> Result<(), PartitionError> {
        self.ensure_open()?;
        self.transition_to(ShardStatus::Closed)?;
        self.state.clear();
        self.last_modified = now;
        Ok(())
    }

    /// Check if the shard contributes to channel synchronization.
    pub fn is_active(&self) -> bool {
        self.status == ShardStatus::Active
    }

    /// Check if the shard is closed.
    pub fn is_closed(&self) -> bool {
        self.status.is_terminal()
    }

    /// Numeric load reported in the state under `load_key`, if any.
    pub fn reported_load(&self, load_key: &str) -> Option<f64> {
        self.state.get(load_key).and_then(StateValue::as_f64)
    }
}

impl Partition for Shard {
    fn partition_id(&self) -> &str {
        self.id.as_str()
    }

    fn owner(&self) -> &ChannelId {
        &self.owner
    }

    fn timestamp(&self) -> u64 {
        self.last_modified
    }

    fn is_encrypted(&self) -> bool {
        self.payload.is_some() || !self.sealed_snapshot.is_empty()
    }
}

/// An indexed, encrypted slice of a larger state blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Identifier derived from channel id and index.
    pub id: FragmentId,
    /// Channel whose blob was fragmented.
    pub channel_id: ChannelId,
    /// Position in `[0, count)`.
    pub index: u32,
    /// Fragment count of the session.
    pub count: u32,
    /// Encrypted slice.
    pub payload: Vec<u8>,
    /// Keccak-256 of `payload`.
    pub digest: Hash,
    /// Creation timestamp (ms).
    pub created_at: u64,
}

impl Partition for Fragment {
    fn partition_id(&self) -> &str {
        self.id.as_str()
    }

    fn owner(&self) -> &ChannelId {
        &self.channel_id
    }

    fn timestamp(&self) -> u64 {
        self.created_at
    }

    fn is_encrypted(&self) -> bool {
        true
    }
}

/// A channel: state, participants and lifecycle.
///
/// Composition links live in the composer's arena, not here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel identifier.
    pub id: ChannelId,
    /// Participant set.
    pub participants: Vec<Participant>,
    /// Own entries plus everything merged into it.
    pub state: StateMap,
    /// Lifecycle status.
    pub status: ChannelStatus,
    /// Open timestamp (ms).
    pub opened_at: u64,
    /// Last mutation timestamp (ms).
    pub updated_at: u64,
}

impl Channel {
    /// Open a new channel.
    pub fn open(id: ChannelId, participants: Vec<Participant>, now: u64) -> Self {
        Self {
            id,
            participants,
            state: StateMap::new(),
            status: ChannelStatus::Open,
            opened_at: now,
            updated_at: now,
        }
    }

    /// Check if the channel accepts mutations.
    pub fn is_open(&self) -> bool {
        self.status == ChannelStatus::Open
    }

    /// Fail with `ChannelClosed` unless open.
    pub fn ensure_open(&self) -> Result<(), PartitionError> {
        if !self.is_open() {
            return Err(PartitionError::ChannelClosed(self.id.clone()));
        }
        Ok(())
    }

    /// Merge entries, last write wins.
    pub fn merge(&mut self, entries: &StateMap, now: u64) {
        for (key, value) in entries {
            self.state.insert(key.clone(), value.clone());
        }
        self.updated_at = now;
    }

    /// Transition to `Closed`. Closing twice is an error.
    pub fn close(&mut self, now: u64) -> Result<(), PartitionError> {
        self.ensure_open()?;
        self.status = ChannelStatus::Closed;
        self.updated_at = now;
        Ok(())
    }
}
