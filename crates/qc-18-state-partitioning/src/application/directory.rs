//! Channel directory: id -> registry handle.
//!
//! Explicitly constructed and shared by `Arc`; the coordinator resolves
//! reallocation targets through it.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::shard_registry::ShardRegistry;
use crate::domain::{ChannelId, PartitionError};

/// Known channel registries in ascending id order.
#[derive(Default)]
pub struct ChannelDirectory {
    registries: RwLock<BTreeMap<ChannelId, Arc<ShardRegistry>>>,
}

impl ChannelDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel. Fails with `DuplicateChannel` if the id is taken.
    pub fn register(&self, registry: Arc<ShardRegistry>) -> Result<(), PartitionError> {
        let mut registries = self.registries.write();
        let id = registry.channel_id().clone();
        if registries.contains_key(&id) {
            return Err(PartitionError::DuplicateChannel(id));
        }
        registries.insert(id, registry);
        Ok(())
    }

    /// Look up a registry.
    pub fn get(&self, id: &ChannelId) -> Option<Arc<ShardRegistry>> {
        self.registries.read().get(id).cloned()
    }

    /// Look up a registry, failing with `ChannelNotFound`.
    pub fn require(&self, id: &ChannelId) -> Result<Arc<ShardRegistry>, PartitionError> {
        self.get(id)
            .ok_or_else(|| PartitionError::ChannelNotFound(id.clone()))
    }

    /// Forget a registry.
    pub fn remove(&self, id: &ChannelId) -> Option<Arc<ShardRegistry>> {
        self.registries.write().remove(id)
    }

    /// Registered ids in ascending order.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.registries.read().keys().cloned().collect()
    }

    /// All registries in ascending id order.
    pub fn registries(&self) -> Vec<Arc<ShardRegistry>> {
        self.registries.read().values().cloned().collect()
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.registries.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.registries.read().is_empty()
    }
}
