//! # Ports Module
//!
//! Inbound (API) and outbound (collaborator) traits.

pub mod inbound;
pub mod outbound;

pub use inbound::{
    CompositionApi, FragmentationApi, ReallocationApi, ReallocationReceipt, ShardRegistryApi,
};
pub use outbound::{
    Clock, EncryptionService, Ledger, ManualClock, MockEncryption, NetworkManager, SystemClock,
};
