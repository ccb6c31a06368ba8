//! # Reallocation Placement
//!
//! Picks which shards leave a channel and which channel receives them.

use std::cmp::Ordering;

use crate::domain::{ChannelId, ShardId};

/// Load summary of one candidate target channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelLoad {
    /// Channel identifier.
    pub channel_id: ChannelId,
    /// Sum of reported shard loads.
    pub total_load: f64,
    /// Number of owned, non-closed shards.
    pub shard_count: usize,
}

/// Shards whose load is at or above `threshold`, in input order.
pub fn overloaded_shards<'a, I>(loads: I, threshold: f64) -> Vec<ShardId>
where
    I: IntoIterator<Item = (&'a ShardId, f64)>,
{
    loads
        .into_iter()
        .filter(|(_, load)| *load >= threshold)
        .map(|(id, _)| id.clone())
        .collect()
}

/// Least-loaded channel other than `source`.
///
/// Ties break on fewer shards, then ascending channel id.
pub fn select_target(candidates: &[ChannelLoad], source: &ChannelId) -> Option<ChannelId> {
    candidates
        .iter()
        .filter(|c| &c.channel_id != source)
        .min_by(|a, b| {
            a.total_load
                .partial_cmp(&b.total_load)
                .unwrap_or(Ordering::Equal)
                .then(a.shard_count.cmp(&b.shard_count))
                .then(a.channel_id.cmp(&b.channel_id))
        })
        .map(|c| c.channel_id.clone())
}
