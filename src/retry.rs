//! Bounded retry for calls to external services.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How many times to try a call and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included. Zero behaves like one.
    pub attempts: u32,
    /// Fixed pause between attempts; no backoff.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: crate::defaults::RETRY_ATTEMPTS,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// A policy that never retries.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. The last error is returned.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(call = label, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(call = label, attempt, max = attempts, error = %e, "attempt failed, retrying");
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
