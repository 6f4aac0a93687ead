//! Bounded backoff polling
//!
//! Widget discovery waits for a resource that the host framework initialises
//! asynchronously. [`RetryPolicy`] bounds that wait by attempt count and by an
//! overall timeout, so a permanently wrong selector ends in an error instead of
//! a task that never finishes.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Backoff strategy for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Linear increase: delay * (attempt + 1)
    Linear,
    /// Exponential increase: delay * 2^attempt
    Exponential,
}

impl BackoffStrategy {
    /// Calculate delay for a given attempt number
    ///
    /// # Arguments
    /// - `attempt`: Zero-based attempt number (0 = first retry)
    /// - `initial_delay`: Base delay duration
    /// - `max_delay`: Maximum delay duration
    pub fn calculate_delay(
        &self,
        attempt: u32,
        initial_delay: Duration,
        max_delay: Duration,
    ) -> Duration {
        let delay = match self {
            BackoffStrategy::Fixed => initial_delay,
            BackoffStrategy::Linear => initial_delay.saturating_mul(attempt.saturating_add(1)),
            BackoffStrategy::Exponential => {
                initial_delay.saturating_mul(2u32.saturating_pow(attempt))
            }
        };

        delay.min(max_delay)
    }
}

/// Retry policy configuration
///
/// Delays are kept in milliseconds so the policy reads naturally from a
/// config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries)
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds
    pub max_delay_ms: u64,
    /// Backoff strategy to use
    pub strategy: BackoffStrategy,
    /// Overall deadline for the whole poll, in milliseconds
    pub timeout_ms: Option<u64>,
}

impl RetryPolicy {
    /// Exponential backoff starting at the host framework's 50ms poll interval
    pub fn exponential() -> Self {
        Self {
            max_attempts: 12,
            initial_delay_ms: 50,
            max_delay_ms: 1_000,
            strategy: BackoffStrategy::Exponential,
            timeout_ms: Some(10_000),
        }
    }

    /// Create a retry policy with fixed delay
    pub fn fixed(delay: Duration) -> Self {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        Self {
            max_attempts: 3,
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            strategy: BackoffStrategy::Fixed,
            timeout_ms: None,
        }
    }

    /// Set maximum retry attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Calculate delay for a specific attempt
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.strategy.calculate_delay(
            attempt,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    /// Overall deadline, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Poll `lookup` until it yields a value, fails, or the budget runs out.
    ///
    /// `lookup` receives the zero-based attempt number and returns
    /// `Ok(Some(value))` when done, `Ok(None)` to be polled again after a
    /// backoff, or `Err` to stop immediately. When the attempt count or the
    /// deadline is exhausted, `exhausted` is called with the number of lookups
    /// performed. The first lookup runs without suspending.
    pub async fn poll_until<T, E, F, X>(&self, mut lookup: F, exhausted: X) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<Option<T>, E>,
        X: FnOnce(u32) -> E,
    {
        let started = Instant::now();
        let deadline = self.timeout();
        let mut attempt = 0;

        loop {
            if let Some(value) = lookup(attempt)? {
                return Ok(value);
            }

            if attempt >= self.max_attempts {
                return Err(exhausted(attempt + 1));
            }

            let delay = self.calculate_delay(attempt);
            if let Some(deadline) = deadline {
                if started.elapsed() + delay > deadline {
                    return Err(exhausted(attempt + 1));
                }
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn test_backoff_delays() {
        let base = Duration::from_millis(50);
        let max = Duration::from_millis(300);

        assert_eq!(BackoffStrategy::Fixed.calculate_delay(4, base, max), base);
        assert_eq!(
            BackoffStrategy::Linear.calculate_delay(2, base, max),
            Duration::from_millis(150)
        );
        assert_eq!(
            BackoffStrategy::Exponential.calculate_delay(2, base, max),
            Duration::from_millis(200)
        );
        // capped
        assert_eq!(BackoffStrategy::Exponential.calculate_delay(10, base, max), max);
    }

    #[test]
    fn test_first_lookup_does_not_suspend() {
        let policy = RetryPolicy::default();
        let result: Result<u32, String> = policy
            .poll_until(|_| Ok(Some(7)), |n| format!("exhausted after {n}"))
            .now_or_never()
            .expect("first lookup should complete synchronously");
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_succeeds_after_retries() {
        let policy = RetryPolicy::fixed(Duration::from_millis(50)).with_max_attempts(10);
        let result: Result<u32, String> = policy
            .poll_until(
                |attempt| Ok((attempt == 3).then_some(attempt)),
                |n| format!("exhausted after {n}"),
            )
            .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_exhausts_attempts() {
        let policy = RetryPolicy::fixed(Duration::from_millis(10)).with_max_attempts(2);
        let mut lookups = 0;
        let result: Result<(), u32> = policy
            .poll_until(
                |_| {
                    lookups += 1;
                    Ok(None)
                },
                |n| n,
            )
            .await;
        assert_eq!(result, Err(3));
        assert_eq!(lookups, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_respects_deadline() {
        let policy = RetryPolicy {
            timeout_ms: Some(250),
            ..RetryPolicy::fixed(Duration::from_millis(100)).with_max_attempts(1_000)
        };
        let result: Result<(), u32> = policy.poll_until(|_| Ok(None), |n| n).await;
        // lookups at 0ms, 100ms, 200ms; the next sleep would cross 250ms
        assert_eq!(result, Err(3));
    }

    #[tokio::test]
    async fn test_poll_until_stops_on_error() {
        let policy = RetryPolicy::default();
        let result: Result<(), &str> = policy
            .poll_until(|_| Err("fatal"), |_| "exhausted")
            .await;
        assert_eq!(result, Err("fatal"));
    }
}
