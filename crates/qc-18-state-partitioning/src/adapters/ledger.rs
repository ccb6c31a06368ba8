//! In-Memory Ledger Adapter
//!
//! Implements the `Ledger` port by appending to an in-process log.
//! Production deployments plug in a durable ledger instead.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::domain::{AuditEvent, AuditEventKind, ChannelId, PartitionError};
use crate::ports::outbound::Ledger;

/// Append-only in-memory audit log.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    events: RwLock<Vec<AuditEvent>>,
    unavailable: AtomicBool,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every write fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// All recorded events in order.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    /// Events recorded for one channel.
    pub fn events_for(&self, channel_id: &ChannelId) -> Vec<AuditEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| &e.channel_id == channel_id)
            .cloned()
            .collect()
    }

    /// Number of events of `kind`.
    pub fn count(&self, kind: AuditEventKind) -> usize {
        self.events.read().iter().filter(|e| e.kind == kind).count()
    }

    /// Total number of events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn record_event(&self, event: AuditEvent) -> Result<(), PartitionError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PartitionError::AuditFailed(format!(
                "ledger unavailable for {:?} on {}",
                event.kind, event.channel_id
            )));
        }

        debug!(
            "[qc-18] Ledger {:?} on {} at {}",
            event.kind, event.channel_id, event.timestamp
        );
        self.events.write().push(event);
        Ok(())
    }
}
