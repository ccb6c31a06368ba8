//! # Tracing Setup
//!
//! Installs a `tracing-subscriber` formatter for binaries embedding the
//! partitioning engine. Library code only emits events.

use tracing_subscriber::EnvFilter;

use crate::config::PartitioningConfig;

/// Install the global subscriber using `config.log_level` as the filter.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(config: &PartitioningConfig) -> bool {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
