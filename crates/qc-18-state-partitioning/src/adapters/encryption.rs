//! XChaCha20-Poly1305 Encryption Adapter
//!
//! Implements the `EncryptionService` port. A fresh 192-bit nonce is
//! generated per call and prefixed to the ciphertext.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::Zeroize;

use crate::domain::PartitionError;
use crate::ports::outbound::EncryptionService;

/// XChaCha20 nonce length.
const NONCE_LEN: usize = 24;

/// Channel sealing key (256-bit), wiped on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SealingKey([u8; 32]);

impl SealingKey {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// XChaCha20-Poly1305 sealing of partition payloads.
pub struct XChaChaEncryption {
    key: SealingKey,
}

impl XChaChaEncryption {
    /// Create with an existing key.
    pub fn new(key: SealingKey) -> Self {
        Self { key }
    }

    /// Create with a fresh random key.
    pub fn generate() -> Self {
        Self::new(SealingKey::generate())
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new((&self.key.0).into())
    }
}

impl EncryptionService for XChaChaEncryption {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, PartitionError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|e| PartitionError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, PartitionError> {
        if sealed.len() < NONCE_LEN {
            return Err(PartitionError::EncryptionFailed(format!(
                "sealed payload shorter than nonce: {} bytes",
                sealed.len()
            )));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|e| PartitionError::EncryptionFailed(e.to_string()))
    }
}
