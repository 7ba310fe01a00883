//! Whole-invocation retry with exponential backoff.
//!
//! Per-item fetch and store failures are absorbed into counters and never
//! reach this layer. Only setup-level errors (store unreachable, client
//! construction) are candidates for a retry.

use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};

use articlepipe_shared::ArticlePipeError;

/// Classifies an error as transient or permanent.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ArticlePipeError {
    fn is_retryable(&self) -> bool {
        match self {
            ArticlePipeError::Network(_) | ArticlePipeError::Storage(_) => true,
            ArticlePipeError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ResourceBusy
            ),
            ArticlePipeError::Config { .. }
            | ArticlePipeError::Parse { .. }
            | ArticlePipeError::Validation { .. } => false,
        }
    }
}

/// Backoff schedule for [`with_retry`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first; 0 disables retrying.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

/// Run `operation`, re-running it while it fails with a retryable error and
/// attempts remain. Returns the first success or the last error.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = policy.initial_delay;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(attempts = attempt + 1, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                warn!(
                    error = %e,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "invocation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(policy.backoff_multiplier).min(policy.max_delay);
            }
            Err(e) => {
                if e.is_retryable() && policy.max_retries > 0 {
                    error!(error = %e, attempts = attempt + 1, "retries exhausted");
                }
                return Err(e);
            }
        }
    }
}
