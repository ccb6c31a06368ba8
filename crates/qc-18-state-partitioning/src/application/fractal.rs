//! # Fractal Composer
//!
//! Composes channels into a tree. Writes propagate down, state
//! aggregates up.
//!
//! ## Layout
//!
//! The tree is an arena of channel records keyed by id. Each record
//! holds its parent id, its child ids in attachment order and a handle
//! to the channel behind its own lock. The arena lock only guards the
//! links and is never held across an await; recursive operations take
//! a snapshot of the subtree's handles first and then lock one channel
//! at a time.
//!
//! ## Two-phase recursion
//!
//! `close` and `update_state` check the whole subtree before changing
//! any node, so a closed or detached descendant fails the call without
//! leaving a half-applied change. A ledger failure during the commit
//! phase still stops the walk where it happened.
//!
//! `add_child` links while holding the parent's channel lock, and
//! `close` re-reads a node's children under that same lock, so a child
//! attached mid-close is closed before its parent.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::context::Collaborators;
use crate::algorithms::{merge_last_write_wins, post_order, pre_order};
use crate::domain::{
    invariant_acyclic, AuditEventKind, Channel, ChannelId, Participant, PartitionError, StateMap,
    StateValue, ValidationMode,
};
use crate::ports::inbound::CompositionApi;

/// One arena slot.
struct ChannelRecord {
    channel: Arc<Mutex<Channel>>,
    parent: Option<ChannelId>,
    children: Vec<ChannelId>,
}

/// Handle and links of one node, captured outside the arena lock.
struct NodeSnapshot {
    id: ChannelId,
    channel: Arc<Mutex<Channel>>,
    children: Vec<ChannelId>,
}

#[derive(Clone, Copy)]
enum Walk {
    ParentFirst,
    ChildrenFirst,
}

/// Fractal composition service.
pub struct FractalComposer {
    arena: RwLock<HashMap<ChannelId, ChannelRecord>>,
    collaborators: Collaborators,
    validation_mode: ValidationMode,
}

impl FractalComposer {
    /// Create an empty composer.
    pub fn new(collaborators: Collaborators, validation_mode: ValidationMode) -> Self {
        Self {
            arena: RwLock::new(HashMap::new()),
            collaborators,
            validation_mode,
        }
    }

    /// Open `child` and attach it under `parent` in one call.
    pub async fn spawn_child(
        &self,
        parent: &ChannelId,
        child: ChannelId,
        participants: Vec<Participant>,
    ) -> Result<(), PartitionError> {
        self.open_channel(child.clone(), participants).await?;
        self.add_child(parent, &child).await
    }

    /// Snapshot of one channel.
    pub async fn channel(&self, id: &ChannelId) -> Option<Channel> {
        let handle = self.arena.read().get(id).map(|r| r.channel.clone())?;
        let channel = handle.lock().await;
        Some(channel.clone())
    }

    /// Current state of one channel, without syncing.
    pub async fn aggregate_state(&self, id: &ChannelId) -> Result<StateMap, PartitionError> {
        self.channel(id)
            .await
            .map(|c| c.state)
            .ok_or_else(|| PartitionError::ChannelNotFound(id.clone()))
    }

    /// Child ids in attachment order.
    pub fn children(&self, id: &ChannelId) -> Vec<ChannelId> {
        self.arena
            .read()
            .get(id)
            .map(|r| r.children.clone())
            .unwrap_or_default()
    }

    /// Parent id, if attached.
    pub fn parent(&self, id: &ChannelId) -> Option<ChannelId> {
        self.arena.read().get(id).and_then(|r| r.parent.clone())
    }

    /// Number of channels in the arena.
    pub fn len(&self) -> usize {
        self.arena.read().len()
    }

    /// Check if the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.arena.read().is_empty()
    }

    /// Validate the subtree and return every failure found.
    pub async fn validate_all(&self, id: &ChannelId) -> Result<Vec<PartitionError>, PartitionError> {
        self.check_subtree(id, false).await
    }

    /// Handles of the subtree rooted at `root` in walk order.
    fn snapshot(&self, root: &ChannelId, walk: Walk) -> Result<Vec<NodeSnapshot>, PartitionError> {
        let arena = self.arena.read();
        if !arena.contains_key(root) {
            return Err(PartitionError::ChannelNotFound(root.clone()));
        }

        let children_of = |id: &ChannelId| {
            arena
                .get(id)
                .map(|r| r.children.clone())
                .unwrap_or_default()
        };
        let order = match walk {
            Walk::ParentFirst => pre_order(root, children_of),
            Walk::ChildrenFirst => post_order(root, children_of),
        };

        order
            .into_iter()
            .map(|id| {
                let record = arena
                    .get(&id)
                    .ok_or_else(|| PartitionError::ChannelNotFound(id.clone()))?;
                Ok(NodeSnapshot {
                    channel: record.channel.clone(),
                    children: record.children.clone(),
                    id,
                })
            })
            .collect()
    }

    /// Every child must point back at its parent.
    fn check_links(&self, node: &NodeSnapshot) -> Result<(), PartitionError> {
        let arena = self.arena.read();
        for child in &node.children {
            let parent = arena.get(child).and_then(|r| r.parent.as_ref());
            if parent != Some(&node.id) {
                return Err(PartitionError::InvalidArgument(format!(
                    "Channel {} lists {} as child but the link is broken",
                    node.id, child
                )));
            }
        }
        Ok(())
    }

    async fn check_subtree(
        &self,
        root: &ChannelId,
        fail_fast: bool,
    ) -> Result<Vec<PartitionError>, PartitionError> {
        let nodes = self.snapshot(root, Walk::ParentFirst)?;
        let mut failures = Vec::new();

        for node in &nodes {
            let link_check = self.check_links(node);
            let open_check = node.channel.lock().await.ensure_open();
            for result in [link_check, open_check] {
                if let Err(err) = result {
                    failures.push(err);
                    if fail_fast {
                        return Ok(failures);
                    }
                }
            }
        }

        Ok(failures)
    }

    /// The node followed by all of its ancestors.
    fn lineage(arena: &HashMap<ChannelId, ChannelRecord>, id: &ChannelId) -> Vec<ChannelId> {
        let mut lineage = vec![id.clone()];
        let mut current = arena.get(id).and_then(|r| r.parent.clone());
        while let Some(ancestor) = current {
            if lineage.contains(&ancestor) {
                break;
            }
            current = arena.get(&ancestor).and_then(|r| r.parent.clone());
            lineage.push(ancestor);
        }
        lineage
    }

    /// Subtrees under `id` whose roots are not in `seen`, children first.
    fn late_children(
        &self,
        id: &ChannelId,
        seen: &HashSet<ChannelId>,
    ) -> Result<Vec<NodeSnapshot>, PartitionError> {
        let newcomers: Vec<ChannelId> = self
            .arena
            .read()
            .get(id)
            .map(|r| {
                r.children
                    .iter()
                    .filter(|c| !seen.contains(*c))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let mut late = Vec::new();
        for child in &newcomers {
            for node in self.snapshot(child, Walk::ChildrenFirst)? {
                self.check_links(&node)?;
                late.push(node);
            }
        }
        Ok(late)
    }

    fn handle(&self, id: &ChannelId) -> Result<Arc<Mutex<Channel>>, PartitionError> {
        self.arena
            .read()
            .get(id)
            .map(|r| r.channel.clone())
            .ok_or_else(|| PartitionError::ChannelNotFound(id.clone()))
    }
}

#[async_trait]
impl CompositionApi for FractalComposer {
    async fn open_channel(
        &self,
        id: ChannelId,
        participants: Vec<Participant>,
    ) -> Result<(), PartitionError> {
        {
            let mut arena = self.arena.write();
            if arena.contains_key(&id) {
                return Err(PartitionError::DuplicateChannel(id));
            }
            let channel = Channel::open(id.clone(), participants.clone(), self.collaborators.now());
            arena.insert(
                id.clone(),
                ChannelRecord {
                    channel: Arc::new(Mutex::new(channel)),
                    parent: None,
                    children: Vec::new(),
                },
            );
        }

        debug!("[qc-18] Fractal channel {} opened", id);
        self.collaborators
            .audit(
                &id,
                AuditEventKind::ChannelOpened,
                json!({ "participants": participants }),
            )
            .await
    }

    async fn add_child(&self, parent: &ChannelId, child: &ChannelId) -> Result<(), PartitionError> {
        let parent_handle = self.handle(parent)?;
        let child_handle = self.handle(child)?;
        child_handle.lock().await.ensure_open()?;

        // The parent stays locked until linked so `close` cannot slip in
        // between the open check and the link.
        let parent_channel = parent_handle.lock().await;
        parent_channel.ensure_open()?;
        {
            let mut arena = self.arena.write();

            let parent_record = arena
                .get(parent)
                .ok_or_else(|| PartitionError::ChannelNotFound(parent.clone()))?;
            if parent_record.children.contains(child) {
                return Err(PartitionError::DuplicateChild {
                    parent: parent.clone(),
                    child: child.clone(),
                });
            }

            let current_parent = arena
                .get(child)
                .ok_or_else(|| PartitionError::ChannelNotFound(child.clone()))?
                .parent
                .clone();
            if let Some(existing) = current_parent {
                return Err(PartitionError::AlreadyAttached {
                    child: child.clone(),
                    parent: existing,
                });
            }

            invariant_acyclic(parent, child, &Self::lineage(&arena, parent))?;

            if let Some(record) = arena.get_mut(child) {
                record.parent = Some(parent.clone());
            }
            if let Some(record) = arena.get_mut(parent) {
                record.children.push(child.clone());
            }
        }
        drop(parent_channel);

        debug!("[qc-18] Attached {} under {}", child, parent);
        self.collaborators
            .audit(
                parent,
                AuditEventKind::ChildAttached,
                json!({ "child": child }),
            )
            .await
    }

    async fn sync_state(&self, id: &ChannelId) -> Result<StateMap, PartitionError> {
        let nodes = self.snapshot(id, Walk::ChildrenFirst)?;
        self.handle(id)?.lock().await.ensure_open()?;

        let now = self.collaborators.now();
        let mut synced: HashMap<ChannelId, StateMap> = HashMap::with_capacity(nodes.len());

        for node in &nodes {
            let mut channel = node.channel.lock().await;
            if channel.is_open() {
                // Own entries first, then children in attachment order.
                let layers = node.children.iter().filter_map(|c| synced.get(c));
                merge_last_write_wins(&mut channel.state, layers);
                channel.updated_at = now;
            }
            synced.insert(node.id.clone(), channel.state.clone());
        }

        let state = synced
            .remove(id)
            .ok_or_else(|| PartitionError::ChannelNotFound(id.clone()))?;

        self.collaborators
            .audit(
                id,
                AuditEventKind::StateSynced,
                json!({ "nodes": nodes.len(), "keys": state.len() }),
            )
            .await?;

        debug!("[qc-18] Synced {} nodes into {}", nodes.len(), id);
        Ok(state)
    }

    async fn close(&self, id: &ChannelId) -> Result<(), PartitionError> {
        let nodes = self.snapshot(id, Walk::ChildrenFirst)?;

        // Phase 1: structure intact and the root still open.
        for node in &nodes {
            self.check_links(node)?;
        }
        self.handle(id)?.lock().await.ensure_open()?;

        // Phase 2: children before parents; closed nodes stay closed.
        let mut seen: HashSet<ChannelId> = nodes.iter().map(|n| n.id.clone()).collect();
        let mut pending: VecDeque<NodeSnapshot> = nodes.into();
        let mut closed = 0;
        while let Some(node) = pending.pop_front() {
            let now = self.collaborators.now();
            {
                let mut channel = node.channel.lock().await;
                if !channel.is_open() {
                    continue;
                }

                // Children attached after the snapshot close before this node.
                let late = self.late_children(&node.id, &seen)?;
                if !late.is_empty() {
                    drop(channel);
                    debug!(
                        "[qc-18] {} gained {} child(ren) while closing {}",
                        node.id,
                        late.len(),
                        id
                    );
                    seen.extend(late.iter().map(|n| n.id.clone()));
                    pending.push_front(node);
                    for late_node in late.into_iter().rev() {
                        pending.push_front(late_node);
                    }
                    continue;
                }
                channel.close(now)?;
            }
            closed += 1;

            if let Err(err) = self
                .collaborators
                .audit(&node.id, AuditEventKind::ChannelClosed, json!({}))
                .await
            {
                warn!("[qc-18] Close of {} stopped at {}: {}", id, node.id, err);
                return Err(err);
            }
        }

        info!("[qc-18] Closed fractal subtree {} ({} channels)", id, closed);
        Ok(())
    }

    async fn update_state(
        &self,
        id: &ChannelId,
        key: String,
        value: StateValue,
    ) -> Result<usize, PartitionError> {
        let nodes = self.snapshot(id, Walk::ParentFirst)?;

        // Phase 1: every node must accept the write.
        for node in &nodes {
            node.channel.lock().await.ensure_open()?;
        }

        // Phase 2: write top-down.
        for node in &nodes {
            let now = self.collaborators.now();
            {
                let mut channel = node.channel.lock().await;
                channel.ensure_open()?;
                channel.state.insert(key.clone(), value.clone());
                channel.updated_at = now;
            }
            self.collaborators
                .audit(
                    &node.id,
                    AuditEventKind::StateUpdated,
                    json!({ "key": key, "origin": id }),
                )
                .await?;
        }

        debug!(
            "[qc-18] Broadcast {} from {} to {} nodes",
            key,
            id,
            nodes.len()
        );
        Ok(nodes.len())
    }

    async fn validate(&self, id: &ChannelId) -> Result<(), PartitionError> {
        match self.validation_mode {
            ValidationMode::FailFast => match self.check_subtree(id, true).await?.into_iter().next() {
                Some(err) => Err(err),
                None => Ok(()),
            },
            ValidationMode::CollectAll => {
                let failures = self.check_subtree(id, false).await?;
                if failures.is_empty() {
                    return Ok(());
                }
                Err(PartitionError::ValidationFailed {
                    failures: failures.iter().map(ToString::to_string).collect(),
                })
            }
        }
    }
}
