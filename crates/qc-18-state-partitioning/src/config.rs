//! # State Partitioning Configuration
//!
//! Configuration for the partitioning engine, loadable from environment
//! variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::{ValidationMode, DEFAULT_MAX_FRAGMENT_COUNT};

/// Bounded retry-with-backoff policy for callers in the automation layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff_ms: u64,
    /// Backoff cap.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1` (attempt is 1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// State partitioning configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitioningConfig {
    /// Period of the reallocation monitor loop.
    pub monitor_interval_ms: u64,

    /// Shard load at or above which the monitor moves the shard.
    pub load_threshold: f64,

    /// State key carrying a shard's self-reported load.
    pub load_key: String,

    /// Upper bound on fragments per session.
    pub max_fragment_count: usize,

    /// How recursive validation reports failures.
    pub validation_mode: ValidationMode,

    /// Retry policy handed to automation callers.
    pub retry: RetryPolicy,

    /// Log level filter (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for PartitioningConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: 5_000,
            load_threshold: 0.8,
            load_key: "load".to_string(),
            max_fragment_count: DEFAULT_MAX_FRAGMENT_COUNT,
            validation_mode: ValidationMode::FailFast,
            retry: RetryPolicy::default(),
            log_level: "info".to_string(),
        }
    }
}

impl PartitioningConfig {
    /// Create a config for testing (short intervals, no backoff wait).
    pub fn for_testing() -> Self {
        Self {
            monitor_interval_ms: 20,
            load_threshold: 0.8,
            load_key: "load".to_string(),
            max_fragment_count: 64,
            validation_mode: ValidationMode::FailFast,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
            },
            log_level: "debug".to_string(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QC_PARTITION_MONITOR_INTERVAL_MS`: monitor period (default: 5000)
    /// - `QC_PARTITION_LOAD_THRESHOLD`: reallocation threshold (default: 0.8)
    /// - `QC_PARTITION_LOAD_KEY`: shard load key (default: load)
    /// - `QC_PARTITION_MAX_FRAGMENTS`: fragment cap (default: 1024)
    /// - `QC_PARTITION_VALIDATION_MODE`: `fail_fast` or `collect_all`
    /// - `QC_PARTITION_RETRY_MAX_ATTEMPTS`: retry attempts (default: 3)
    /// - `QC_PARTITION_RETRY_INITIAL_MS`: first backoff (default: 50)
    /// - `QC_PARTITION_RETRY_MAX_MS`: backoff cap (default: 500)
    /// - `QC_LOG_LEVEL` or `RUST_LOG`: log level (default: info)
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let validation_mode = match env::var("QC_PARTITION_VALIDATION_MODE")
            .map(|v| v.to_lowercase())
            .as_deref()
        {
            Ok("collect_all") => ValidationMode::CollectAll,
            Ok("fail_fast") => ValidationMode::FailFast,
            _ => defaults.validation_mode,
        };

        Self {
            monitor_interval_ms: env_or(
                "QC_PARTITION_MONITOR_INTERVAL_MS",
                defaults.monitor_interval_ms,
            ),
            load_threshold: env_or("QC_PARTITION_LOAD_THRESHOLD", defaults.load_threshold),
            load_key: env::var("QC_PARTITION_LOAD_KEY").unwrap_or(defaults.load_key),
            max_fragment_count: env_or("QC_PARTITION_MAX_FRAGMENTS", defaults.max_fragment_count),
            validation_mode,
            retry: RetryPolicy {
                max_attempts: env_or(
                    "QC_PARTITION_RETRY_MAX_ATTEMPTS",
                    defaults.retry.max_attempts,
                ),
                initial_backoff_ms: env_or(
                    "QC_PARTITION_RETRY_INITIAL_MS",
                    defaults.retry.initial_backoff_ms,
                ),
                max_backoff_ms: env_or("QC_PARTITION_RETRY_MAX_MS", defaults.retry.max_backoff_ms),
            },
            log_level: env::var("QC_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or(defaults.log_level),
        }
    }

    /// Monitor period as a `Duration`.
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
