//! Bounded exponential backoff for transient ledger and staging failures.

use std::future::Future;
use std::time::Duration;

use crate::error::{WalletError, WalletResult};

/// Retry policy for async operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
    /// Timeout for each individual attempt.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff starting at 100ms, capped at 30s, three retries.
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            timeout: None,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::exponential()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        self.initial_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `operation`, retrying transient failures (`Network`, `Timeout`).
    ///
    /// Any other error is returned immediately. The last transient error is
    /// surfaced once the retry budget is exhausted.
    pub async fn execute<F, Fut, T>(&self, what: &str, mut operation: F) -> WalletResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = WalletResult<T>>,
    {
        let mut attempt = 0;

        loop {
            let outcome = match self.timeout {
                Some(limit) => tokio::time::timeout(limit, operation())
                    .await
                    .unwrap_or_else(|_| {
                        Err(WalletError::Timeout(format!(
                            "{what} exceeded {}ms",
                            limit.as_millis()
                        )))
                    }),
                None => operation().await,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.calculate_delay(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        tracing::error!(operation = what, attempts = attempt + 1, error = %err, "Retry budget exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }
}
