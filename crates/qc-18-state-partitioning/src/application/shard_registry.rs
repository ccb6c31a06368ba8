//! # Shard Registry
//!
//! Owns the shards of one channel. All state (channel record and shard
//! map) sits behind a single exclusive lock held for the whole logical
//! operation, ledger write included, so operations on one channel are
//! totally ordered and a slow ledger backpressures the channel.
//!
//! The single lock serializes every shard of the channel; with high
//! shard counts this is the contention point. Splitting it per shard id
//! is possible once cross-shard operations (sync, rebalance, close) take
//! their locks in id order.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::context::Collaborators;
use crate::algorithms::{Assignment, RebalancePolicy, RoundRobinPolicy};
use crate::domain::{
    invariant_no_participant_dropped, AuditEventKind, Channel, ChannelId, Participant,
    PartitionError, Shard, ShardId, StateMap, StateValue,
};
use crate::ports::inbound::ShardRegistryApi;

/// Everything guarded by the channel lock.
#[derive(Debug)]
pub struct RegistryState {
    /// Channel record, including the aggregate state.
    pub channel: Channel,
    /// Owned shards in ascending id order.
    pub shards: BTreeMap<ShardId, Shard>,
}

impl RegistryState {
    fn shard_mut(&mut self, id: &ShardId) -> Result<&mut Shard, PartitionError> {
        self.shards
            .get_mut(id)
            .ok_or_else(|| PartitionError::ShardNotFound(id.clone()))
    }

    /// Merge active shards into the aggregate, ascending id order.
    fn merge_active_shards(&mut self, now: u64) -> usize {
        let mut merged = 0;
        for shard in self.shards.values().filter(|s| s.is_active()) {
            for (key, value) in &shard.state {
                self.channel.state.insert(key.clone(), value.clone());
            }
            merged += 1;
        }
        self.channel.updated_at = now;
        merged
    }
}

/// Shard registry of one channel.
pub struct ShardRegistry {
    channel_id: ChannelId,
    state: Mutex<RegistryState>,
    collaborators: Collaborators,
    policy: Box<dyn RebalancePolicy>,
}

impl ShardRegistry {
    /// Open a channel with a round-robin rebalance policy.
    pub async fn open(
        channel_id: ChannelId,
        participants: Vec<Participant>,
        collaborators: Collaborators,
    ) -> Result<Self, PartitionError> {
        Self::open_with_policy(
            channel_id,
            participants,
            collaborators,
            Box::new(RoundRobinPolicy),
        )
        .await
    }

    /// Open a channel with an explicit rebalance policy.
    pub async fn open_with_policy(
        channel_id: ChannelId,
        participants: Vec<Participant>,
        collaborators: Collaborators,
        policy: Box<dyn RebalancePolicy>,
    ) -> Result<Self, PartitionError> {
        let now = collaborators.now();
        let channel = Channel::open(channel_id.clone(), participants.clone(), now);

        let registry = Self {
            channel_id: channel_id.clone(),
            state: Mutex::new(RegistryState {
                channel,
                shards: BTreeMap::new(),
            }),
            collaborators,
            policy,
        };

        registry
            .collaborators
            .audit(
                &channel_id,
                AuditEventKind::ChannelOpened,
                json!({ "participants": participants }),
            )
            .await?;

        info!("[qc-18] Channel {} opened", channel_id);
        Ok(registry)
    }

    /// Channel identifier.
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Shared collaborators.
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Acquire the channel lock.
    pub async fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().await
    }

    /// Check if the channel is still open.
    pub async fn is_open(&self) -> bool {
        self.state.lock().await.channel.is_open()
    }

    /// Owned shard ids in ascending order.
    pub async fn shard_ids(&self) -> Vec<ShardId> {
        self.state.lock().await.shards.keys().cloned().collect()
    }

    /// Allocate a shard carrying an encrypted payload.
    ///
    /// Fails with `ShardAlreadyAllocated` if the id is owned already.
    pub async fn allocate_shard(&self, id: ShardId, payload: &[u8]) -> Result<Shard, PartitionError> {
        let mut state = self.state.lock().await;
        state.channel.ensure_open()?;

        if state.shards.contains_key(&id) {
            return Err(PartitionError::ShardAlreadyAllocated(id));
        }

        let sealed_payload = self.collaborators.encrypt(payload)?;
        let sealed_snapshot = self.collaborators.seal_state(&StateMap::new())?;
        let now = self.collaborators.now();

        let mut shard = Shard::new(
            id.clone(),
            self.channel_id.clone(),
            state.channel.participants.clone(),
            sealed_snapshot,
            now,
        );
        shard.payload = Some(sealed_payload);
        state.shards.insert(id.clone(), shard.clone());

        self.collaborators
            .audit(
                &self.channel_id,
                AuditEventKind::ShardAllocated,
                json!({ "shard": id, "payload_bytes": payload.len() }),
            )
            .await?;

        debug!("[qc-18] Allocated shard {} in {}", id, self.channel_id);
        Ok(shard)
    }
}

/// Lock two registries in ascending channel-id order.
///
/// Guards are returned in argument order. Both must be distinct channels.
pub async fn lock_pair<'a>(
    first: &'a ShardRegistry,
    second: &'a ShardRegistry,
) -> Result<(MutexGuard<'a, RegistryState>, MutexGuard<'a, RegistryState>), PartitionError> {
    if first.channel_id == second.channel_id {
        return Err(PartitionError::InvalidArgument(format!(
            "source and target are the same channel: {}",
            first.channel_id
        )));
    }

    if first.channel_id < second.channel_id {
        let a = first.state.lock().await;
        let b = second.state.lock().await;
        Ok((a, b))
    } else {
        let b = second.state.lock().await;
        let a = first.state.lock().await;
        Ok((a, b))
    }
}

#[async_trait]
impl ShardRegistryApi for ShardRegistry {
    async fn create_shard(
        &self,
        id: ShardId,
        participants: Vec<Participant>,
    ) -> Result<Shard, PartitionError> {
        let mut state = self.state.lock().await;
        state.channel.ensure_open()?;

        if state.shards.contains_key(&id) {
            return Err(PartitionError::DuplicateShard(id));
        }

        let sealed_snapshot = self.collaborators.seal_state(&StateMap::new())?;
        let shard = Shard::new(
            id.clone(),
            self.channel_id.clone(),
            participants.clone(),
            sealed_snapshot,
            self.collaborators.now(),
        );
        state.shards.insert(id.clone(), shard.clone());

        self.collaborators
            .audit(
                &self.channel_id,
                AuditEventKind::ShardCreated,
                json!({ "shard": id, "participants": participants }),
            )
            .await?;

        debug!("[qc-18] Created shard {} in {}", id, self.channel_id);
        Ok(shard)
    }

    async fn close_shard(&self, id: &ShardId) -> Result<(), PartitionError> {
        let mut state = self.state.lock().await;
        state.channel.ensure_open()?;

        let now = self.collaborators.now();
        state.shard_mut(id)?.close(now)?;

        self.collaborators
            .audit(
                &self.channel_id,
                AuditEventKind::ShardClosed,
                json!({ "shard": id }),
            )
            .await?;

        debug!("[qc-18] Closed shard {} in {}", id, self.channel_id);
        Ok(())
    }

    async fn update_shard_state(
        &self,
        id: &ShardId,
        key: String,
        value: StateValue,
    ) -> Result<(), PartitionError> {
        let mut state = self.state.lock().await;
        state.channel.ensure_open()?;

        let now = self.collaborators.now();
        state.shard_mut(id)?.write(key.clone(), value, now)?;

        // One record per key write, never batched.
        self.collaborators
            .audit(
                &self.channel_id,
                AuditEventKind::ShardUpdated,
                json!({ "shard": id, "key": key }),
            )
            .await
    }

    async fn sync_shards(&self) -> Result<StateMap, PartitionError> {
        let mut state = self.state.lock().await;
        state.channel.ensure_open()?;

        let now = self.collaborators.now();
        let merged = state.merge_active_shards(now);

        self.collaborators
            .audit(
                &self.channel_id,
                AuditEventKind::ShardsSynced,
                json!({ "shards": merged }),
            )
            .await?;

        debug!(
            "[qc-18] Synced {} shards into {}",
            merged, self.channel_id
        );
        Ok(state.channel.state.clone())
    }

    async fn rebalance_shards(&self) -> Result<Assignment, PartitionError> {
        let mut state = self.state.lock().await;
        state.channel.ensure_open()?;

        let current: Assignment = state
            .shards
            .values()
            .filter(|s| !s.is_closed())
            .map(|s| (s.id.clone(), s.participants.clone()))
            .collect();
        if current.is_empty() {
            return Ok(current);
        }

        let proposed = self.policy.rebalance(&current);

        // Validate the whole proposal before touching any shard.
        let current_ids: BTreeSet<&ShardId> = current.keys().collect();
        let proposed_ids: BTreeSet<&ShardId> = proposed.keys().collect();
        if current_ids != proposed_ids {
            return Err(PartitionError::InvalidArgument(format!(
                "policy {} changed the shard set",
                self.policy.name()
            )));
        }
        invariant_no_participant_dropped(current.values().flatten(), proposed.values().flatten())?;

        let now = self.collaborators.now();
        for (id, participants) in &proposed {
            let shard = state.shard_mut(id)?;
            shard.participants = participants.clone();
            shard.last_modified = now;
        }

        for (id, participants) in &proposed {
            self.collaborators
                .audit(
                    &self.channel_id,
                    AuditEventKind::ShardRebalanced,
                    json!({
                        "shard": id,
                        "participants": participants,
                        "policy": self.policy.name(),
                    }),
                )
                .await?;
        }

        info!(
            "[qc-18] Rebalanced {} shards in {} ({})",
            proposed.len(),
            self.channel_id,
            self.policy.name()
        );
        Ok(proposed)
    }

    async fn close_channel(&self) -> Result<(), PartitionError> {
        let mut state = self.state.lock().await;
        state.channel.ensure_open()?;

        // Created and Active both transition to Closed, so no shard can
        // fail midway once the channel is known to be open.
        let to_close: Vec<ShardId> = state
            .shards
            .values()
            .filter(|s| !s.is_closed())
            .map(|s| s.id.clone())
            .collect();

        let now = self.collaborators.now();
        let merged = state.merge_active_shards(now);
        for id in &to_close {
            state.shard_mut(id)?.close(now)?;
        }
        state.channel.close(now)?;

        self.collaborators
            .audit(
                &self.channel_id,
                AuditEventKind::ShardsSynced,
                json!({ "shards": merged }),
            )
            .await?;
        for id in &to_close {
            self.collaborators
                .audit(
                    &self.channel_id,
                    AuditEventKind::ShardClosed,
                    json!({ "shard": id }),
                )
                .await?;
        }
        self.collaborators
            .audit(
                &self.channel_id,
                AuditEventKind::ChannelClosed,
                json!({ "shards_closed": to_close.len() }),
            )
            .await?;

        info!(
            channel = %self.channel_id,
            shards = to_close.len(),
            "[qc-18] Channel closed"
        );
        Ok(())
    }

    async fn get_shard(&self, id: &ShardId) -> Option<Shard> {
        self.state.lock().await.shards.get(id).cloned()
    }

    async fn channel_state(&self) -> StateMap {
        self.state.lock().await.channel.state.clone()
    }
}
