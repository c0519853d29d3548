//! Retry policy for registry calls made by the agent

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Capped exponential backoff over a bounded number of attempts
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A policy that tries exactly once
    pub fn once() -> Self {
        Self::with_attempts(1)
    }

    /// Calculate backoff duration for the given retry count
    pub fn backoff_duration(&self, retry_count: u32) -> Duration {
        let base = self.initial_backoff.as_millis() as u64;
        let exponential = 2u64.saturating_pow(retry_count);
        let backoff_ms = base
            .saturating_mul(exponential)
            .min(self.max_backoff.as_millis() as u64);
        Duration::from_millis(backoff_ms)
    }

    /// Run `op` until it succeeds or the attempts are exhausted, returning the last error
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= attempts {
                        return Err(e.context(format!("{} failed after {} attempts", what, attempt)));
                    }
                    let delay = self.backoff_duration(attempt - 1);
                    warn!(
                        "{} failed (attempt {}/{}): {:#}, retrying in {:?}",
                        what, attempt, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
