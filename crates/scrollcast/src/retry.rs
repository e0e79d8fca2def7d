//! Attempt an operation a bounded number of times with exponential backoff.

use crate::clock::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Attempt bound and backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Total attempts, including the first
    pub max_attempts: usize,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Factor applied to the delay after each further failure
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy
    #[must_use]
    pub const fn new(max_attempts: usize, initial_delay: Duration, multiplier: u32) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is 1-based
    #[must_use]
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_delay.saturating_mul(factor)
    }

    /// Full schedule of delays between attempts
    #[must_use]
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|a| self.delay_after(a)).collect()
    }
}

/// Every attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    /// Attempts made
    pub attempts: usize,
    /// Error of the final attempt
    pub last_error: E,
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gave up after {} attempt(s): {}",
            self.attempts, self.last_error
        )
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryExhausted<E> {}

/// Run `operation` until it succeeds or the policy is exhausted
///
/// `operation` receives the 1-based attempt number. Between attempts the
/// caller sleeps on `clock` according to the policy; there is no sleep
/// after the final attempt. A policy with zero attempts still tries once.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    clock: &dyn Clock,
    mut operation: F,
) -> Result<T, RetryExhausted<E>>
where
    E: fmt::Display,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt >= max_attempts => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }
            Err(error) => {
                let delay = policy.delay_after(attempt);
                warn!(attempt, max_attempts, ?delay, %error, "attempt failed, backing off");
                clock.sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
