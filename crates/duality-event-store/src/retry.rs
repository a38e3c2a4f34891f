//! Bounded retry of store operations that hit lock contention.

use std::future::Future;
use std::time::Duration;

use duality_core::error::DomainError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How many times, and how patiently, a contended operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; grows linearly per attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff: the delay after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }
}

/// Sleeps for `delay` unless `cancel` fires first.
///
/// # Errors
///
/// Returns `DomainError::Cancelled` if the token was cancelled.
pub async fn sleep_or_cancel(
    cancel: &CancellationToken,
    delay: Duration,
    operation: &str,
) -> Result<(), DomainError> {
    tokio::select! {
        () = cancel.cancelled() => Err(DomainError::Cancelled(operation.to_owned())),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Runs `attempt_fn` until it succeeds, fails with something other than
/// contention, or the retry budget is spent.
///
/// Cancellation is checked before every attempt and during every backoff.
///
/// # Errors
///
/// Returns the first non-contention error, the last contention error once
/// the budget is exhausted, or `DomainError::Cancelled`.
pub async fn retry_on_contention<T, F, Fut>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    operation: &str,
    mut attempt_fn: F,
) -> Result<T, DomainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled(operation.to_owned()));
        }

        match attempt_fn().await {
            Err(err) if err.is_contention() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "store contention, retrying"
                );
                sleep_or_cancel(cancel, delay, operation).await?;
                attempt += 1;
            }
            Err(err) if err.is_contention() => {
                return Err(err.context(&format!("{operation} after {attempt} attempts")));
            }
            other => return other,
        }
    }
}
