//! # Reallocation Coordinator
//!
//! Moves exclusive ownership of shards from one source channel to other
//! channels in the directory, and runs the background leveling loop.
//!
//! ## Protocol
//!
//! ```text
//! lock source + target (ascending channel id)
//!   Pending --transfer ok--> Prepared --membership moved--> Committed
//!      \--transfer failed--> Aborted (nothing changed)
//! audit out (source) + in (target)
//! unlock
//! ```
//!
//! Both locks are held from the ownership check to the audit, so no
//! caller ever observes the shard in both channels or in neither.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::directory::ChannelDirectory;
use super::shard_registry::{lock_pair, ShardRegistry};
use crate::algorithms::{overloaded_shards, select_target, ChannelLoad, ReallocationTransaction};
use crate::config::PartitioningConfig;
use crate::domain::{
    invariant_exclusive_ownership, AuditEventKind, ChannelId, Partition, PartitionError, Shard,
    ShardId,
};
use crate::ports::inbound::{ReallocationApi, ReallocationReceipt};
use crate::ports::outbound::NetworkManager;

/// Reallocation coordinator for one source channel.
pub struct ReallocationCoordinator {
    source: Arc<ShardRegistry>,
    directory: Arc<ChannelDirectory>,
    network: Arc<dyn NetworkManager>,
    config: PartitioningConfig,
    observed_loads: RwLock<HashMap<ShardId, f64>>,
}

impl ReallocationCoordinator {
    /// Create a coordinator moving shards out of `source`.
    pub fn new(
        source: Arc<ShardRegistry>,
        directory: Arc<ChannelDirectory>,
        network: Arc<dyn NetworkManager>,
        config: PartitioningConfig,
    ) -> Self {
        Self {
            source,
            directory,
            network,
            config,
            observed_loads: RwLock::new(HashMap::new()),
        }
    }

    /// Source channel id.
    pub fn source_id(&self) -> &ChannelId {
        self.source.channel_id()
    }

    /// Record an external load signal for a shard. Overrides the value
    /// the shard reports in its own state. The entry is dropped once the
    /// shard leaves the source.
    pub fn observe_load(&self, shard: ShardId, load: f64) {
        self.observed_loads.write().insert(shard, load);
    }

    /// Load last observed for `shard`, if still tracked.
    pub fn observed_load(&self, shard: &ShardId) -> Option<f64> {
        self.observed_loads.read().get(shard).copied()
    }

    fn shard_load(&self, shard: &Shard) -> Option<f64> {
        self.observed_loads
            .read()
            .get(&shard.id)
            .copied()
            .or_else(|| shard.reported_load(&self.config.load_key))
    }

    /// Load summary of every open channel except the source.
    async fn candidate_loads(&self) -> Vec<ChannelLoad> {
        let mut loads = Vec::new();
        for registry in self.directory.registries() {
            if registry.channel_id() == self.source.channel_id() {
                continue;
            }
            let state = registry.lock().await;
            if !state.channel.is_open() {
                continue;
            }
            let live: Vec<&Shard> = state.shards.values().filter(|s| !s.is_closed()).collect();
            loads.push(ChannelLoad {
                channel_id: registry.channel_id().clone(),
                total_load: live.iter().filter_map(|s| self.shard_load(s)).sum(),
                shard_count: live.len(),
            });
        }
        loads
    }

    /// Start the leveling loop. The loop ends on `shutdown`, or by
    /// itself once the source channel is closed.
    pub fn spawn_monitor(self: &Arc<Self>, interval: Duration) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(async move {
            coordinator.monitor_and_reallocate(interval, shutdown_rx).await;
        });
        MonitorHandle { shutdown_tx, task }
    }

    /// Leveling loop body; runs until shutdown or source closure.
    pub async fn monitor_and_reallocate(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "[qc-18] Reallocation monitor started for {} (every {:?})",
            self.source_id(),
            interval
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.source.is_open().await {
                        info!("[qc-18] Source {} closed, monitor exiting", self.source_id());
                        break;
                    }
                    let moved = self.run_monitor_pass().await;
                    if !moved.is_empty() {
                        info!(
                            "[qc-18] Monitor moved {} shards out of {}",
                            moved.len(),
                            self.source_id()
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("[qc-18] Reallocation monitor for {} stopped", self.source_id());
                        break;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ReallocationApi for ReallocationCoordinator {
    async fn allocate_shard(&self, id: ShardId, payload: &[u8]) -> Result<Shard, PartitionError> {
        self.source.allocate_shard(id, payload).await
    }

    async fn reallocate_shard(
        &self,
        id: &ShardId,
        target_id: &ChannelId,
    ) -> Result<ReallocationReceipt, PartitionError> {
        let target = self.directory.require(target_id)?;
        let (mut src, mut dst) = lock_pair(&self.source, &target).await?;
        src.channel.ensure_open()?;
        dst.channel.ensure_open()?;

        let shard = src
            .shards
            .get(id)
            .ok_or_else(|| PartitionError::ShardNotFound(id.clone()))?;
        shard.ensure_open()?;
        if dst.shards.contains_key(id) {
            return Err(PartitionError::DuplicateShard(id.clone()));
        }

        let collaborators = self.source.collaborators();
        let mut tx = ReallocationTransaction::new(
            id.clone(),
            self.source_id().clone(),
            target_id.clone(),
            collaborators.now(),
        );

        // Phase 1: move the data between peer sets.
        if let Err(err) = self
            .network
            .transfer(shard.partition_id(), self.source_id(), target_id)
            .await
        {
            let reason = match err {
                PartitionError::TransferFailed { reason, .. } => reason,
                other => other.to_string(),
            };
            tx.abort(reason.clone())?;
            warn!(
                transaction = %tx.id,
                shard = %id,
                "[qc-18] Reallocation aborted: {}",
                reason
            );
            return Err(PartitionError::TransferFailed {
                partition: id.to_string(),
                reason,
            });
        }
        tx.prepare()?;

        // Phase 2: move membership.
        let now = collaborators.now();
        let mut moved = src
            .shards
            .remove(id)
            .ok_or_else(|| PartitionError::ShardNotFound(id.clone()))?;
        moved.owner = target_id.clone();
        moved.reallocated = true;
        moved.last_modified = now;
        dst.shards.insert(id.clone(), moved);
        tx.commit()?;
        self.observed_loads.write().remove(id);

        let owners: Vec<ChannelId> = [(&*src, self.source_id()), (&*dst, target_id)]
            .into_iter()
            .filter(|(state, _)| state.shards.contains_key(id))
            .map(|(_, channel)| channel.clone())
            .collect();
        invariant_exclusive_ownership(id, &owners)?;

        collaborators
            .audit(
                self.source_id(),
                AuditEventKind::ShardReallocatedOut,
                json!({ "shard": id, "to": target_id, "transaction": tx.id }),
            )
            .await?;
        target
            .collaborators()
            .audit(
                target_id,
                AuditEventKind::ShardReallocatedIn,
                json!({ "shard": id, "from": self.source_id(), "transaction": tx.id }),
            )
            .await?;

        info!(
            transaction = %tx.id,
            shard = %id,
            channel = %self.source_id(),
            "[qc-18] Reallocated shard to {}",
            target_id
        );
        Ok(ReallocationReceipt {
            transaction_id: tx.id,
            shard_id: id.clone(),
            source: self.source_id().clone(),
            target: target_id.clone(),
            completed_at: now,
        })
    }

    async fn run_monitor_pass(&self) -> Vec<ReallocationReceipt> {
        let (overloaded, loads) = {
            let state = self.source.lock().await;
            if !state.channel.is_open() {
                return Vec::new();
            }
            self.observed_loads
                .write()
                .retain(|id, _| state.shards.contains_key(id));

            let loads: HashMap<ShardId, f64> = state
                .shards
                .values()
                .filter(|s| !s.is_closed() && !s.reallocated)
                .filter_map(|s| self.shard_load(s).map(|load| (s.id.clone(), load)))
                .collect();
            let mut hot = overloaded_shards(
                loads.iter().map(|(id, load)| (id, *load)),
                self.config.load_threshold,
            );
            hot.sort();
            (hot, loads)
        };
        if overloaded.is_empty() {
            return Vec::new();
        }

        let mut candidates = self.candidate_loads().await;
        let mut receipts = Vec::new();

        for shard_id in overloaded {
            let Some(target) = select_target(&candidates, self.source_id()) else {
                warn!(
                    shard = %shard_id,
                    channel = %self.source_id(),
                    "[qc-18] No target channel for overloaded shard"
                );
                break;
            };

            match self.reallocate_shard(&shard_id, &target).await {
                Ok(receipt) => {
                    let load = loads.get(&shard_id).copied().unwrap_or_default();
                    if let Some(entry) = candidates.iter_mut().find(|c| c.channel_id == target) {
                        entry.total_load += load;
                        entry.shard_count += 1;
                    }
                    receipts.push(receipt);
                }
                Err(err) => {
                    warn!(
                        shard = %shard_id,
                        channel = %target,
                        "[qc-18] Monitor could not move shard: {}",
                        err
                    );
                    // Not offered again this pass.
                    candidates.retain(|c| c.channel_id != target);
                }
            }
        }

        debug!(
            "[qc-18] Monitor pass on {} moved {} shards",
            self.source_id(),
            receipts.len()
        );
        receipts
    }
}

/// Handle to a running monitor loop.
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the loop to stop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.task.await {
            warn!("[qc-18] Monitor task ended abnormally: {}", err);
        }
    }

    /// Check if the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryLedger, LoopbackNetwork};
    use crate::application::context::Collaborators;
    use crate::ports::inbound::ShardRegistryApi;
    use crate::ports::outbound::{ManualClock, MockEncryption};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Loopback transport that refuses every transfer into one channel.
    struct RefusingNetwork {
        refused: ChannelId,
        attempts: AtomicUsize,
        inner: LoopbackNetwork,
    }

    #[async_trait]
    impl NetworkManager for RefusingNetwork {
        async fn transfer(
            &self,
            partition_id: &str,
            from: &ChannelId,
            to: &ChannelId,
        ) -> Result<(), PartitionError> {
            if to == &self.refused {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                return Err(PartitionError::TransferFailed {
                    partition: partition_id.to_string(),
                    reason: "peer unreachable".to_string(),
                });
            }
            self.inner.transfer(partition_id, from, to).await
        }
    }

    struct Fixture {
        coordinator: Arc<ReallocationCoordinator>,
        source: Arc<ShardRegistry>,
        directory: Arc<ChannelDirectory>,
        network: Arc<LoopbackNetwork>,
        ledger: Arc<InMemoryLedger>,
    }

    async fn create_fixture(targets: &[&str]) -> Fixture {
        let ledger = Arc::new(InMemoryLedger::new());
        let collaborators = Collaborators::new(
            ledger.clone(),
            Arc::new(MockEncryption::default()),
            Arc::new(ManualClock::new(500)),
        );
        let directory = Arc::new(ChannelDirectory::new());

        let source = Arc::new(
            ShardRegistry::open(ChannelId::from("chan-a"), vec!["p".into()], collaborators.clone())
                .await
                .unwrap(),
        );
        directory.register(source.clone()).unwrap();
        for target in targets {
            let registry = ShardRegistry::open(ChannelId::from(*target), vec![], collaborators.clone())
                .await
                .unwrap();
            directory.register(Arc::new(registry)).unwrap();
        }

        let network = Arc::new(LoopbackNetwork::new());
        let coordinator = Arc::new(ReallocationCoordinator::new(
            source.clone(),
            directory.clone(),
            network.clone(),
            PartitioningConfig::for_testing(),
        ));

        Fixture {
            coordinator,
            source,
            directory,
            network,
            ledger,
        }
    }

    #[tokio::test]
    async fn test_allocate_rejects_duplicate() {
        let fx = create_fixture(&["chan-b"]).await;
        fx.coordinator
            .allocate_shard(ShardId::from("p1"), b"blob")
            .await
            .unwrap();
        assert!(matches!(
            fx.coordinator.allocate_shard(ShardId::from("p1"), b"blob").await,
            Err(PartitionError::ShardAlreadyAllocated(_))
        ));
    }

    #[tokio::test]
    async fn test_reallocation_is_exclusive() {
        let fx = create_fixture(&["chan-b"]).await;
        let id = ShardId::from("p1");
        fx.coordinator.allocate_shard(id.clone(), b"blob").await.unwrap();

        let receipt = fx
            .coordinator
            .reallocate_shard(&id, &ChannelId::from("chan-b"))
            .await
            .unwrap();
        assert_eq!(receipt.completed_at, 500);

        let target = fx.directory.get(&ChannelId::from("chan-b")).unwrap();
        let moved = target.get_shard(&id).await.unwrap();
        assert!(moved.reallocated);
        assert_eq!(moved.owner, ChannelId::from("chan-b"));
        assert!(fx.source.get_shard(&id).await.is_none());

        assert_eq!(fx.network.transfers().len(), 1);
        assert_eq!(fx.ledger.count(AuditEventKind::ShardReallocatedOut), 1);
        assert_eq!(fx.ledger.count(AuditEventKind::ShardReallocatedIn), 1);
        let incoming = fx.ledger.events_for(&ChannelId::from("chan-b"));
        assert!(incoming
            .iter()
            .any(|e| e.kind == AuditEventKind::ShardReallocatedIn));
    }

    #[tokio::test]
    async fn test_reallocate_missing_shard() {
        let fx = create_fixture(&["chan-b"]).await;
        assert!(matches!(
            fx.coordinator
                .reallocate_shard(&ShardId::from("ghost"), &ChannelId::from("chan-b"))
                .await,
            Err(PartitionError::ShardNotFound(_))
        ));
        assert!(matches!(
            fx.coordinator
                .reallocate_shard(&ShardId::from("ghost"), &ChannelId::from("nowhere"))
                .await,
            Err(PartitionError::ChannelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reallocate_to_self_rejected() {
        let fx = create_fixture(&[]).await;
        let id = ShardId::from("p1");
        fx.coordinator.allocate_shard(id.clone(), b"x").await.unwrap();
        assert!(matches!(
            fx.coordinator
                .reallocate_shard(&id, &ChannelId::from("chan-a"))
                .await,
            Err(PartitionError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_transfer_changes_nothing() {
        let fx = create_fixture(&["chan-b"]).await;
        let id = ShardId::from("p1");
        fx.coordinator.allocate_shard(id.clone(), b"blob").await.unwrap();
        fx.network.set_failing(true);

        let result = fx
            .coordinator
            .reallocate_shard(&id, &ChannelId::from("chan-b"))
            .await;
        assert!(matches!(result, Err(PartitionError::TransferFailed { .. })));

        let kept = fx.source.get_shard(&id).await.unwrap();
        assert!(!kept.reallocated);
        let target = fx.directory.get(&ChannelId::from("chan-b")).unwrap();
        assert!(target.get_shard(&id).await.is_none());
        assert_eq!(fx.ledger.count(AuditEventKind::ShardReallocatedOut), 0);
    }

    #[tokio::test]
    async fn test_target_with_same_id_rejected() {
        let fx = create_fixture(&["chan-b"]).await;
        let id = ShardId::from("p1");
        fx.coordinator.allocate_shard(id.clone(), b"x").await.unwrap();
        let target = fx.directory.get(&ChannelId::from("chan-b")).unwrap();
        target.create_shard(id.clone(), vec![]).await.unwrap();

        assert!(matches!(
            fx.coordinator
                .reallocate_shard(&id, &ChannelId::from("chan-b"))
                .await,
            Err(PartitionError::DuplicateShard(_))
        ));
        assert!(fx.source.get_shard(&id).await.is_some());
    }

    #[tokio::test]
    async fn test_monitor_pass_moves_hot_shards_to_least_loaded() {
        let fx = create_fixture(&["chan-b", "chan-c"]).await;

        // chan-b already carries load.
        let busy = fx.directory.get(&ChannelId::from("chan-b")).unwrap();
        busy.create_shard(ShardId::from("b1"), vec![]).await.unwrap();
        busy.update_shard_state(&ShardId::from("b1"), "load".into(), serde_json::json!(0.5))
            .await
            .unwrap();

        fx.source.create_shard(ShardId::from("hot"), vec![]).await.unwrap();
        fx.source
            .update_shard_state(&ShardId::from("hot"), "load".into(), serde_json::json!(0.9))
            .await
            .unwrap();
        fx.source.create_shard(ShardId::from("cool"), vec![]).await.unwrap();
        fx.coordinator.observe_load(ShardId::from("cool"), 0.1);

        let receipts = fx.coordinator.run_monitor_pass().await;
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].shard_id, ShardId::from("hot"));
        assert_eq!(receipts[0].target, ChannelId::from("chan-c"));
        assert!(fx.source.get_shard(&ShardId::from("cool")).await.is_some());

        // Nothing left to move.
        assert!(fx.coordinator.run_monitor_pass().await.is_empty());
    }

    #[tokio::test]
    async fn test_monitor_pass_without_targets_moves_nothing() {
        let fx = create_fixture(&[]).await;
        fx.source.create_shard(ShardId::from("hot"), vec![]).await.unwrap();
        fx.coordinator.observe_load(ShardId::from("hot"), 1.0);

        assert!(fx.coordinator.run_monitor_pass().await.is_empty());
        assert!(fx.source.get_shard(&ShardId::from("hot")).await.is_some());
    }

    #[tokio::test]
    async fn test_monitor_loop_moves_and_shuts_down() {
        let fx = create_fixture(&["chan-b"]).await;
        fx.coordinator
            .allocate_shard(ShardId::from("hot"), b"blob")
            .await
            .unwrap();
        fx.coordinator.observe_load(ShardId::from("hot"), 0.95);

        let handle = fx.coordinator.spawn_monitor(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
        handle.shutdown().await;

        assert!(fx.source.get_shard(&ShardId::from("hot")).await.is_none());
        assert_eq!(fx.ledger.count(AuditEventKind::ShardReallocatedIn), 1);
    }

    #[tokio::test]
    async fn test_monitor_exits_when_source_closes() {
        let fx = create_fixture(&["chan-b"]).await;
        let handle = fx.coordinator.spawn_monitor(Duration::from_millis(5));

        fx.source.close_channel().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_reallocated_shard_not_bounced_back() {
        let fx = create_fixture(&["chan-b"]).await;
        let hot = ShardId::from("hot");
        fx.source.create_shard(hot.clone(), vec![]).await.unwrap();
        fx.source
            .update_shard_state(&hot, "load".into(), serde_json::json!(0.9))
            .await
            .unwrap();
        assert_eq!(fx.coordinator.run_monitor_pass().await.len(), 1);

        let chan_b = fx.directory.get(&ChannelId::from("chan-b")).unwrap();
        let from_b = ReallocationCoordinator::new(
            chan_b.clone(),
            fx.directory.clone(),
            fx.network.clone(),
            PartitioningConfig::for_testing(),
        );

        // Still hot on chan-b, and chan-a is an open target.
        let moved = chan_b.get_shard(&hot).await.unwrap();
        assert_eq!(moved.reported_load("load"), Some(0.9));
        assert!(from_b.run_monitor_pass().await.is_empty());
        assert!(fx.coordinator.run_monitor_pass().await.is_empty());

        assert!(chan_b.get_shard(&hot).await.is_some());
        assert!(fx.source.get_shard(&hot).await.is_none());
        assert_eq!(fx.network.transfers().len(), 1);
    }

    #[tokio::test]
    async fn test_monitor_pass_skips_failed_target() {
        let fx = create_fixture(&["chan-b", "chan-c"]).await;
        let network = Arc::new(RefusingNetwork {
            refused: ChannelId::from("chan-b"),
            attempts: AtomicUsize::new(0),
            inner: LoopbackNetwork::new(),
        });
        let coordinator = ReallocationCoordinator::new(
            fx.source.clone(),
            fx.directory.clone(),
            network.clone(),
            PartitioningConfig::for_testing(),
        );
        for name in ["h1", "h2", "h3"] {
            fx.source.create_shard(ShardId::from(name), vec![]).await.unwrap();
            coordinator.observe_load(ShardId::from(name), 0.9);
        }

        // chan-b wins the empty tie on id, fails once and is not retried.
        let receipts = coordinator.run_monitor_pass().await;
        assert_eq!(network.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(receipts.len(), 2);
        assert!(receipts
            .iter()
            .all(|r| r.target == ChannelId::from("chan-c")));
        assert!(fx.source.get_shard(&ShardId::from("h1")).await.is_some());
        assert_eq!(network.inner.transfers().len(), 2);
    }

    #[tokio::test]
    async fn test_observed_load_dropped_when_shard_leaves() {
        let fx = create_fixture(&["chan-b"]).await;
        let hot = ShardId::from("hot");
        fx.coordinator.allocate_shard(hot.clone(), b"blob").await.unwrap();
        fx.coordinator.observe_load(hot.clone(), 0.95);
        fx.coordinator.observe_load(ShardId::from("never-allocated"), 0.5);
        assert_eq!(fx.coordinator.observed_load(&hot), Some(0.95));

        assert_eq!(fx.coordinator.run_monitor_pass().await.len(), 1);
        assert_eq!(fx.coordinator.observed_load(&hot), None);
        assert_eq!(
            fx.coordinator.observed_load(&ShardId::from("never-allocated")),
            None
        );
    }
}
