//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implements outbound port traits for the partitioning engine.

mod encryption;
mod ledger;
mod network;

pub use encryption::{SealingKey, XChaChaEncryption};
pub use ledger::InMemoryLedger;
pub use network::{LoopbackNetwork, TransferRecord};
