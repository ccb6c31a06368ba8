//! # Domain Value Objects
//!
//! Identifiers, lifecycle states and audit records for State Partitioning.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Participant identifier (peer address or public key string).
pub type Participant = String;

/// Value stored under a state key.
pub type StateValue = serde_json::Value;

/// Ordered key -> value state mapping. Ordering keeps merges and
/// snapshots reproducible.
pub type StateMap = BTreeMap<String, StateValue>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Create from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow as `&str`.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Channel identifier.
    ChannelId
);

string_id!(
    /// Shard identifier, unique within its owning channel.
    ShardId
);

/// Fragment identifier derived from channel id and index.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FragmentId(String);

impl FragmentId {
    /// Derive the identifier of fragment `index` of `channel`.
    pub fn derive(channel: &ChannelId, index: u32) -> Self {
        Self(format!("{}/fragment-{}", channel, index))
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shard lifecycle: `Absent -> Created -> Active -> Closed`.
///
/// `Absent` is represented by the shard not being in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ShardStatus {
    /// Created with empty state and a sealed snapshot.
    #[default]
    Created,
    /// Holds state written after creation.
    Active,
    /// Terminal - state cleared.
    Closed,
}

impl ShardStatus {
    /// Check if transition to next state is valid.
    pub fn can_transition_to(&self, next: ShardStatus) -> bool {
        match (self, next) {
            (Self::Created, Self::Active) => true,
            (Self::Created, Self::Closed) => true,
            (Self::Active, Self::Active) => true,
            (Self::Active, Self::Closed) => true,
            _ => false,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Channel lifecycle. `Closed` is terminal and entered exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ChannelStatus {
    /// Accepting mutations.
    #[default]
    Open,
    /// Terminal.
    Closed,
}

/// Reallocation two-phase commit state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReallocationState {
    /// Both channels locked, nothing transferred yet.
    #[default]
    Pending,
    /// Network transfer acknowledged.
    Prepared,
    /// Ownership moved to the target.
    Committed,
    /// Transfer failed; ownership unchanged.
    Aborted,
}

impl ReallocationState {
    /// Check if transition to next state is valid.
    pub fn can_transition_to(&self, next: ReallocationState) -> bool {
        match (self, next) {
            (Self::Pending, Self::Prepared) => true,
            (Self::Pending, Self::Aborted) => true,
            (Self::Prepared, Self::Committed) => true,
            (Self::Prepared, Self::Aborted) => true,
            _ => false,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

/// Kind of audited event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// Blob split into fragments.
    Fragmented,
    /// Fragment set reassembled.
    Reassembled,
    /// Shard created.
    ShardCreated,
    /// Shard state key written.
    ShardUpdated,
    /// Shard closed.
    ShardClosed,
    /// Shards merged into the channel aggregate.
    ShardsSynced,
    /// Shard participant set recorded after rebalance.
    ShardRebalanced,
    /// Shard allocated with a payload.
    ShardAllocated,
    /// Shard left this channel.
    ShardReallocatedOut,
    /// Shard arrived in this channel.
    ShardReallocatedIn,
    /// Channel opened.
    ChannelOpened,
    /// Channel closed.
    ChannelClosed,
    /// Child attached to a composed channel.
    ChildAttached,
    /// Composed state aggregated bottom-up.
    StateSynced,
    /// Broadcast write applied to a composed tree.
    StateUpdated,
}

/// One ledger record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Channel the event belongs to.
    pub channel_id: ChannelId,
    /// What happened.
    pub kind: AuditEventKind,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Event-specific details.
    pub details: serde_json::Value,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(
        channel_id: ChannelId,
        kind: AuditEventKind,
        timestamp: u64,
        details: serde_json::Value,
    ) -> Self {
        Self {
            channel_id,
            kind,
            timestamp,
            details,
        }
    }
}

/// How recursive validation reports failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Stop at the first failing node.
    #[default]
    FailFast,
    /// Visit every node and report all failures.
    CollectAll,
}
