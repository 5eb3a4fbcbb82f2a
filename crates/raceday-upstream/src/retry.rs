//! Bounded retry with exponential backoff and jitter.
//!
//! The schedule is pure (`backoff_delay`) so it can be unit-tested without
//! sleeping; `run_with_retry` drives an async operation through it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;

use crate::error::UpstreamError;

/// Clamp bounds for a server-supplied `Retry-After` hint.
const RETRY_AFTER_MIN: Duration = Duration::from_secs(1);
const RETRY_AFTER_MAX: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts including the first (3 = initial try + 2 retries).
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    /// Deadline across all attempts of one logical call.
    pub total_deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(5),
            total_deadline: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based: the delay after the
    /// first failure is `attempt = 0`). `jitter` in `[0, 1)` scales the
    /// upper half of the window so concurrent callers fan out.
    pub fn backoff_delay(&self, attempt: u32, jitter: f64) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.cap);
        let half = exp / 2;
        half + exp.mul_f64(jitter.clamp(0.0, 1.0) / 2.0)
    }
}

/// Clamp a `Retry-After` hint into `[1s, 10s]`.
pub fn clamp_retry_after(hint: Duration) -> Duration {
    hint.clamp(RETRY_AFTER_MIN, RETRY_AFTER_MAX)
}

/// Run `op` with up to `policy.max_attempts` attempts under the policy's
/// total deadline. Only transient errors are retried; a 429's clamped
/// `Retry-After` overrides the computed backoff for that wait. Every
/// retry bumps `retries` so callers can report retry totals.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    retries: &AtomicU64,
    mut op: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let attempts = async {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                    let delay = match err.retry_after() {
                        Some(hint) => clamp_retry_after(hint),
                        None => policy.backoff_delay(attempt, rand::thread_rng().gen::<f64>()),
                    };
                    tracing::warn!(
                        what,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying transient upstream failure"
                    );
                    retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    };

    match tokio::time::timeout(policy.total_deadline, attempts).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::transient(format!(
            "{what}: total deadline of {:?} exceeded",
            policy.total_deadline
        ))),
    }
}
