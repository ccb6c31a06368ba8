//! # Application Module
//!
//! Services implementing the inbound ports over the domain, the
//! algorithms and the outbound collaborators.

pub mod context;
pub mod directory;
pub mod fractal;
pub mod fragmentation;
pub mod reallocation;
pub mod retry;
pub mod shard_registry;

pub use context::Collaborators;
pub use directory::ChannelDirectory;
pub use fractal::FractalComposer;
pub use fragmentation::{FragmentSet, FragmentationCodec};
pub use reallocation::{MonitorHandle, ReallocationCoordinator};
pub use retry::retry_with_backoff;
pub use shard_registry::{lock_pair, RegistryState, ShardRegistry};
