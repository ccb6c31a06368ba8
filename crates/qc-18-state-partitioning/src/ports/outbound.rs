//! # Outbound Ports
//!
//! Traits for external collaborators: ledger, encryption service,
//! network manager and clock.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::domain::{AuditEvent, ChannelId, PartitionError};

/// Durable audit log - outbound port.
///
/// Called synchronously after every mutating operation. A failure does
/// not roll back the mutation already applied.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Record one event.
    async fn record_event(&self, event: AuditEvent) -> Result<(), PartitionError>;
}

/// Payload confidentiality - outbound port.
pub trait EncryptionService: Send + Sync {
    /// Encrypt plaintext.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, PartitionError>;

    /// Decrypt ciphertext produced by `encrypt`.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, PartitionError>;
}

/// Peer transport - outbound port. Used only for reallocation.
#[async_trait]
pub trait NetworkManager: Send + Sync {
    /// Move the data of `partition_id` from one channel's peers to another's.
    async fn transfer(
        &self,
        partition_id: &str,
        from: &ChannelId,
        to: &ChannelId,
    ) -> Result<(), PartitionError>;
}

/// Time source for audit timestamps.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Wall-clock implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            // Clock before the Unix epoch
            .unwrap_or(0)
    }
}

// =============================================================================
// Mock Implementations for Testing
// =============================================================================

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Start at `start` ms.
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Advance by `ms`.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Mock encryption: reversible byte mask, switchable failure.
#[derive(Debug, Default)]
pub struct MockEncryption {
    failing: AtomicBool,
}

const MOCK_MASK: u8 = 0x5A;

impl MockEncryption {
    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), PartitionError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PartitionError::EncryptionFailed(
                "mock encryption unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl EncryptionService for MockEncryption {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, PartitionError> {
        self.check()?;
        Ok(plaintext.iter().map(|b| b ^ MOCK_MASK).collect())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, PartitionError> {
        self.check()?;
        Ok(ciphertext.iter().map(|b| b ^ MOCK_MASK).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_encryption_roundtrip() {
        let enc = MockEncryption::default();
        let ciphertext = enc.encrypt(b"state").unwrap();
        assert_ne!(ciphertext, b"state");
        assert_eq!(enc.decrypt(&ciphertext).unwrap(), b"state");
    }

    #[test]
    fn test_mock_encryption_failure() {
        let enc = MockEncryption::default();
        enc.set_failing(true);
        assert!(matches!(
            enc.encrypt(b"x"),
            Err(PartitionError::EncryptionFailed(_))
        ));
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(100);
        clock.advance(50);
        assert_eq!(clock.now_millis(), 150);
    }

    #[test]
    fn test_system_clock_after_epoch() {
        assert!(SystemClock.now_millis() > 0);
    }
}
