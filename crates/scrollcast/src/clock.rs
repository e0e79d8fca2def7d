//! Injectable sleeping for settle delays, capture cadence and retry backoff.
//!
//! Production code sleeps on the tokio timer; tests swap in [`FakeClock`],
//! which returns immediately and remembers every requested delay.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Source of (possibly simulated) delays
#[async_trait]
pub trait Clock: Send + Sync {
    /// Suspend the caller for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Real time, backed by `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Clock that never waits and records requested sleeps
#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl FakeClock {
    /// Create a new fake clock
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All sleeps requested so far, in order
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Sum of all requested sleeps
    #[must_use]
    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

#[async_trait]
impl Clock for FakeClock {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
    }
}
