//! Bounded retry for automation callers.
//!
//! Engine operations never retry on their own. Callers that drive them
//! unattended wrap calls here; only collaborator failures (ledger,
//! encryption, network) are retried.

use std::future::Future;
use tracing::{error, warn};

use crate::config::RetryPolicy;
use crate::domain::PartitionError;

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are exhausted. Returns the last error.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, PartitionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PartitionError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if attempt >= max_attempts => {
                error!(
                    "[qc-18] {} failed after {} attempts: {}",
                    operation, attempt, err
                );
                return Err(err);
            }
            Err(err) => {
                let delay = policy.backoff_for(attempt);
                warn!(
                    "[qc-18] {} attempt {}/{} failed ({}), retrying in {:?}",
                    operation, attempt, max_attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
