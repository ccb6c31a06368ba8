//! Loopback Network Adapter
//!
//! Implements the `NetworkManager` port in-process: transfers always
//! succeed unless switched to failing, and every transfer is recorded.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::domain::{ChannelId, PartitionError};
use crate::ports::outbound::NetworkManager;

/// One completed transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRecord {
    /// Partition moved.
    pub partition_id: String,
    /// Source channel.
    pub from: ChannelId,
    /// Target channel.
    pub to: ChannelId,
}

/// In-process network manager.
#[derive(Debug, Default)]
pub struct LoopbackNetwork {
    transfers: RwLock<Vec<TransferRecord>>,
    failing: AtomicBool,
}

impl LoopbackNetwork {
    /// Create a working loopback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent transfer fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Completed transfers in order.
    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.transfers.read().clone()
    }
}

#[async_trait]
impl NetworkManager for LoopbackNetwork {
    async fn transfer(
        &self,
        partition_id: &str,
        from: &ChannelId,
        to: &ChannelId,
    ) -> Result<(), PartitionError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PartitionError::TransferFailed {
                partition: partition_id.to_string(),
                reason: "loopback transfer disabled".to_string(),
            });
        }

        debug!("[qc-18] Transferring {} from {} to {}", partition_id, from, to);
        self.transfers.write().push(TransferRecord {
            partition_id: partition_id.to_string(),
            from: from.clone(),
            to: to.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transfer_recorded() {
        let net = LoopbackNetwork::new();
        net.transfer("s1", &ChannelId::from("a"), &ChannelId::from("b"))
            .await
            .unwrap();

        let transfers = net.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].partition_id, "s1");
        assert_eq!(transfers[0].to, ChannelId::from("b"));
    }

    #[tokio::test]
    async fn test_failing_transfer() {
        let net = LoopbackNetwork::new();
        net.set_failing(true);

        let result = net
            .transfer("s1", &ChannelId::from("a"), &ChannelId::from("b"))
            .await;
        assert!(matches!(result, Err(PartitionError::TransferFailed { .. })));
        assert!(net.transfers().is_empty());
    }
}
