//! # Collaborator Context
//!
//! The ledger, encryption service and clock shared by the partitioning
//! services of one deployment. Constructed explicitly and passed by
//! handle; there is no process-wide instance.

use std::sync::Arc;

use crate::adapters::{InMemoryLedger, XChaChaEncryption};
use crate::domain::{AuditEvent, AuditEventKind, ChannelId, PartitionError, StateMap};
use crate::ports::outbound::{Clock, EncryptionService, Ledger, SystemClock};

/// Handles to the external collaborators.
#[derive(Clone)]
pub struct Collaborators {
    /// Audit log.
    pub ledger: Arc<dyn Ledger>,
    /// Payload confidentiality.
    pub encryption: Arc<dyn EncryptionService>,
    /// Timestamp source.
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Bundle collaborators.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        encryption: Arc<dyn EncryptionService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            encryption,
            clock,
        }
    }

    /// In-process collaborators; the ledger handle is returned for inspection.
    pub fn in_memory() -> (Self, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let collaborators = Self::new(
            ledger.clone(),
            Arc::new(XChaChaEncryption::generate()),
            Arc::new(SystemClock),
        );
        (collaborators, ledger)
    }

    /// Current time in ms.
    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Record an audit event, normalizing collaborator errors to `AuditFailed`.
    pub async fn audit(
        &self,
        channel_id: &ChannelId,
        kind: AuditEventKind,
        details: serde_json::Value,
    ) -> Result<(), PartitionError> {
        let event = AuditEvent::new(channel_id.clone(), kind, self.now(), details);
        self.ledger.record_event(event).await.map_err(|e| match e {
            PartitionError::AuditFailed(_) => e,
            other => PartitionError::AuditFailed(other.to_string()),
        })
    }

    /// Serialize and encrypt a state snapshot.
    pub fn seal_state(&self, state: &StateMap) -> Result<Vec<u8>, PartitionError> {
        let bytes = serde_json::to_vec(state)?;
        self.encrypt(&bytes)
    }

    /// Decrypt and deserialize a sealed snapshot.
    pub fn open_state(&self, sealed: &[u8]) -> Result<StateMap, PartitionError> {
        let bytes = self.decrypt(sealed)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Encrypt, normalizing collaborator errors to `EncryptionFailed`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, PartitionError> {
        self.encryption.encrypt(plaintext).map_err(as_encryption_error)
    }

    /// Decrypt, normalizing collaborator errors to `EncryptionFailed`.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, PartitionError> {
        self.encryption.decrypt(ciphertext).map_err(as_encryption_error)
    }
}

fn as_encryption_error(err: PartitionError) -> PartitionError {
    match err {
        PartitionError::EncryptionFailed(_) => err,
        other => PartitionError::EncryptionFailed(other.to_string()),
    }
}
