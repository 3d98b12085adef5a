//! Connect retry with a small fixed budget.

use crate::errors::{ConnectionFailureReason, TransportError};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Errors that can be retried.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

impl RetryableError for TransportError {
    /// Only unclassified connect failures are retried. Auth and sudo
    /// failures will not change on a second attempt.
    fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connect(message) => {
                ConnectionFailureReason::classify(message) == ConnectionFailureReason::Unknown
            }
            TransportError::Io(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectRetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    pub delay: Duration,
}

impl Default for ConnectRetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_millis(150),
        }
    }
}

impl ConnectRetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            delay: Duration::ZERO,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// budget is spent.
pub async fn run_with_retry<F, Fut, T, E>(
    operation: &str,
    policy: &ConnectRetryPolicy,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let max_attempts = policy.retries + 1;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                warn!(operation, attempt, error = %err, "Attempt failed, retrying");
                debug!(operation, delay_ms = policy.delay.as_millis() as u64, "Backing off");
                sleep(policy.delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
