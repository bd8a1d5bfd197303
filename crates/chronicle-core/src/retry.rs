//! Retrying operations that fail transiently.
//!
//! Stores never retry on their own: a [`StoreError::ConcurrencyConflict`]
//! means the caller's view is stale and only the caller can rebuild the
//! batch. [`retry`] re-runs a closure with exponential backoff while a
//! predicate accepts the error. To bound the total time, drop the future
//! or wrap it in [`tokio::time::timeout`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use chronicle_types::{StoreError, StoreResult};
use rand::Rng;

/// Backoff schedule for [`retry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Randomise each delay into `[delay / 2, delay]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Set the attempt limit.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Disable jitter, making delays deterministic.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay after the `failures`-th consecutive failure, before jitter.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    fn delay(&self, failures: u32) -> Duration {
        let base = self.backoff(failures);
        if !self.jitter || base.is_zero() {
            return base;
        }
        base.mul_f64(rand::rng().random_range(0.5..=1.0))
    }
}

/// Run `op` until it succeeds, `should_retry` rejects its error, or the
/// attempts run out. `op` receives the 1-based attempt number.
///
/// # Errors
///
/// Returns the last error `op` produced.
pub async fn retry<T, E, F, Fut, P>(policy: &RetryPolicy, should_retry: P, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && should_retry(&e) => {
                let delay = policy.delay(attempt);
                tracing::debug!(
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`retry`] on [`StoreError::ConcurrencyConflict`] only.
///
/// `op` must re-read the current version on every attempt.
pub async fn retry_on_conflict<T, F, Fut>(policy: &RetryPolicy, op: F) -> StoreResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    retry(policy, StoreError::is_conflict, op).await
}

/// [`retry`] on errors [`StoreError::is_retryable`] accepts.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, op: F) -> StoreResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    retry(policy, StoreError::is_retryable, op).await
}
