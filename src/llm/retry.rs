//! Retry combinator with exponential backoff.
//!
//! Applied uniformly to every call against the NLP service. The policy is a
//! plain value so it can be built from configuration and tested on its own.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Randomize each delay within `[base / 2, base]`, never below `initial_backoff`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(6),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without sleeping. Used in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: false,
        }
    }

    /// Deterministic delay after the `failed_attempts`-th failure (1-based):
    /// `initial * 2^(n-1)`, capped at `max_backoff`.
    pub fn base_delay(&self, failed_attempts: u32) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }

    fn delay(&self, failed_attempts: u32) -> Duration {
        let base = self.base_delay(failed_attempts);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let low = (base / 2).max(self.initial_backoff.min(base));
        if low >= base {
            return base;
        }
        rand::thread_rng().gen_range(low..=base)
    }
}

/// Final failure of a retried operation.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Attempts actually made.
    pub attempts: u32,
    /// Error from the last attempt.
    pub last_error: E,
}

/// Run `op` until it succeeds, returns a non-retryable error, or the policy's
/// attempt budget runs out.
pub async fn retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    is_retryable: P,
    mut op: F,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= max_attempts || !is_retryable(&e) {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                let delay = policy.delay(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
