//! Bounded retry with exponential backoff.
//!
//! One named helper instead of per-call-site loops: callers pass the policy,
//! a predicate deciding whether an error is worth retrying, and the operation
//! itself. The policy is plain data so it can be constructor-injected into
//! every component that touches the network or the database, never read from
//! ambient global state.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry bounds for network and persistence operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Sleep before the second attempt; doubles each retry.
    pub base_delay: Duration,
    /// Upper bound on the per-retry sleep.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (1-based).
    fn delay_after(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        exp.min(self.max_delay)
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping between attempts.
///
/// Only errors for which `is_transient` returns true are retried; anything
/// else is returned immediately. On exhaustion the last error is returned.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> std::result::Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "attempt {}/{} failed: {}. Retrying in {:?}...",
                    attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(e) => return Err(e),
        }
    }
}
