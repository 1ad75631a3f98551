//! Resilient RPC caller with bounded exponential backoff.
//!
//! Wraps any chain-node or rail call. Transient failures (network,
//! timeout, rate limit, generic RPC errors) are retried with
//! `delay = min(base * 2^attempt, cap)`; fatal errors propagate
//! immediately. Exhausting the attempt budget re-raises the last error.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::AppError;

/// Retry policy for a wrapped call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retrying after the given zero-based attempt
    #[must_use]
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(32) as u64);
        exp.min(self.max_delay_ms)
    }
}

/// Execute `op`, retrying transient failures per `policy`.
///
/// `op` must be a zero-argument closure producing a fresh future per
/// attempt; `name` labels the call in logs.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, name: &str, op: F) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.backoff_delay_ms(attempt);
                warn!(
                    call = %name,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay,
                    error = %e,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(call = %name, attempts = policy.max_attempts, error = %e, "Retries exhausted");
                } else {
                    debug!(call = %name, error = %e, "Fatal error, not retrying");
                }
                return Err(e);
            }
        }
    }
}
