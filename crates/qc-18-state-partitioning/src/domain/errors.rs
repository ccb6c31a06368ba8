//! # Domain Errors
//!
//! Error types for the State Partitioning subsystem.
//!
//! Every variant maps onto one [`ErrorKind`] so callers (and the retry
//! helper) can reason about the failure class without matching each
//! variant.

use thiserror::Error;

use super::value_objects::{ChannelId, ShardId};

/// Hash type (32-byte keccak256).
pub type Hash = [u8; 32];

/// Coarse failure classes exposed to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Shard, fragment or channel absent.
    NotFound,
    /// Duplicate identifier.
    AlreadyExists,
    /// Zero counts, empty data, malformed input.
    InvalidArgument,
    /// Fragment set missing indices or failing verification.
    IncompleteData,
    /// Operation attempted after closure.
    ClosedChannel,
    /// Encryption collaborator failed.
    EncryptionFailed,
    /// Ledger write failed.
    AuditFailed,
    /// Network manager failed during reallocation.
    TransferFailed,
}

/// State partitioning error types.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// Shard not owned by the channel.
    #[error("Shard not found: {0}")]
    ShardNotFound(ShardId),

    /// Channel not present in the arena or directory.
    #[error("Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    /// Shard ID already exists in the registry.
    #[error("Duplicate shard: {0}")]
    DuplicateShard(ShardId),

    /// Shard ID already allocated by the coordinator.
    #[error("Shard already allocated: {0}")]
    ShardAlreadyAllocated(ShardId),

    /// Channel ID already opened.
    #[error("Duplicate channel: {0}")]
    DuplicateChannel(ChannelId),

    /// Child already attached to this parent.
    #[error("Duplicate child {child} under {parent}")]
    DuplicateChild {
        /// Parent channel
        parent: ChannelId,
        /// Child channel
        child: ChannelId,
    },

    /// Child already attached to a different parent.
    #[error("Channel {child} already attached to {parent}")]
    AlreadyAttached {
        /// Child channel
        child: ChannelId,
        /// Current parent
        parent: ChannelId,
    },

    /// Attaching would create a cycle in the composition tree.
    #[error("Attaching {child} under {parent} would create a cycle")]
    CycleDetected {
        /// Prospective parent
        parent: ChannelId,
        /// Prospective child
        child: ChannelId,
    },

    /// Fragment count is zero or yields zero-sized fragments.
    #[error("Invalid fragment count {count} for {len} bytes")]
    InvalidFragmentCount {
        /// Requested count
        count: usize,
        /// Data length
        len: usize,
    },

    /// Fragment set has gaps.
    #[error("Incomplete fragment set: missing {missing:?} of {expected}")]
    IncompleteFragmentSet {
        /// Missing indices
        missing: Vec<u32>,
        /// Expected fragment count
        expected: u32,
    },

    /// Fragment digest or session metadata does not match.
    #[error("Fragment {index} failed verification: {reason}")]
    FragmentIntegrity {
        /// Fragment index
        index: u32,
        /// What did not match
        reason: String,
    },

    /// Channel already closed.
    #[error("Channel closed: {0}")]
    ChannelClosed(ChannelId),

    /// Shard already closed.
    #[error("Shard closed: {0}")]
    ShardClosed(ShardId),

    /// Encryption collaborator failure.
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Ledger collaborator failure.
    #[error("Audit failed: {0}")]
    AuditFailed(String),

    /// Network collaborator failure.
    #[error("Transfer of {partition} failed: {reason}")]
    TransferFailed {
        /// Partition being moved
        partition: String,
        /// Collaborator reason
        reason: String,
    },

    /// Invalid lifecycle transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Attempted state
        to: String,
    },

    /// Rebalance policy lost a participant.
    #[error("Rebalance dropped participant: {0}")]
    ParticipantDropped(String),

    /// Collect-all validation found one or more failing nodes.
    #[error("Validation failed for {} node(s): {}", .failures.len(), .failures.join("; "))]
    ValidationFailed {
        /// One message per failing node
        failures: Vec<String>,
    },

    /// Generic invalid input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Snapshot (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PartitionError {
    /// Failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ShardNotFound(_) | Self::ChannelNotFound(_) => ErrorKind::NotFound,
            Self::DuplicateShard(_)
            | Self::ShardAlreadyAllocated(_)
            | Self::DuplicateChannel(_)
            | Self::DuplicateChild { .. }
            | Self::AlreadyAttached { .. } => ErrorKind::AlreadyExists,
            Self::IncompleteFragmentSet { .. } | Self::FragmentIntegrity { .. } => {
                ErrorKind::IncompleteData
            }
            Self::ChannelClosed(_) | Self::ShardClosed(_) => ErrorKind::ClosedChannel,
            Self::EncryptionFailed(_) => ErrorKind::EncryptionFailed,
            Self::AuditFailed(_) => ErrorKind::AuditFailed,
            Self::TransferFailed { .. } => ErrorKind::TransferFailed,
            Self::CycleDetected { .. }
            | Self::InvalidFragmentCount { .. }
            | Self::InvalidTransition { .. }
            | Self::ParticipantDropped(_)
            | Self::ValidationFailed { .. }
            | Self::InvalidArgument(_)
            | Self::Serialization(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Collaborator failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::EncryptionFailed | ErrorKind::AuditFailed | ErrorKind::TransferFailed
        )
    }
}

impl From<serde_json::Error> for PartitionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
