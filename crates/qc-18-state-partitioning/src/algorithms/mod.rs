//! # Algorithms Module
//!
//! Pure algorithms behind the partitioning services.

pub mod fragmentation;
pub mod placement;
pub mod rebalance;
pub mod tree;
pub mod two_phase_commit;

pub use fragmentation::{fragment_ranges, payload_digest};
pub use placement::{overloaded_shards, select_target, ChannelLoad};
pub use rebalance::{Assignment, RebalancePolicy, RoundRobinPolicy, StaticPolicy};
pub use tree::{merge_last_write_wins, post_order, pre_order};
pub use two_phase_commit::ReallocationTransaction;
