//! Retry with backoff for fallible broker operations
//!
//! Used by the connection manager when dialing the broker at startup
//! (linear) and by the outbox relay between failed publishes (exponential).
//! The message consumer does not retry in-process; it requeues and lets
//! the broker redeliver.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `attempt * base`: 2s, 4s, 6s, ...
    Linear,
    /// `base * 2^(attempt - 1)`: 2s, 4s, 8s, ...
    Exponential,
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
    /// Cap on any single delay
    pub max_backoff: Duration,
    pub strategy: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            strategy: Backoff::Exponential,
        }
    }
}

impl RetryConfig {
    /// Linear schedule used for broker connections
    pub fn linear(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: base,
            max_backoff: base.saturating_mul(max_attempts.max(1)),
            strategy: Backoff::Linear,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.strategy {
            Backoff::Linear => self.initial_backoff.saturating_mul(attempt),
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.initial_backoff.saturating_mul(factor)
            }
        };
        std::cmp::min(delay, self.max_backoff)
    }
}

/// Retry a fallible async operation with backoff
///
/// No delay follows the final attempt; its error is returned as is.
///
/// # Example
/// ```rust
/// use event_bus::retry::{retry_with_backoff, RetryConfig};
///
/// # async fn example() -> Result<(), String> {
/// let config = RetryConfig::default();
/// let result = retry_with_backoff(
///     || async { Ok::<_, String>(42) },
///     &config,
///     "example_operation"
/// ).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation: F,
    config: &RetryConfig,
    context: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + Send,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        context = %context,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        context = %context,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let backoff = config.delay_after(attempt);
                warn!(
                    context = %context,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying with backoff"
                );

                sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_linear_schedule() {
        let config = RetryConfig::linear(15, Duration::from_secs(2));
        assert_eq!(config.delay_after(1), Duration::from_secs(2));
        assert_eq!(config.delay_after(2), Duration::from_secs(4));
        assert_eq!(config.delay_after(14), Duration::from_secs(28));
    }

    #[test]
    fn test_exponential_schedule_is_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            strategy: Backoff::Exponential,
        };
        assert_eq!(config.delay_after(1), Duration::from_millis(10));
        assert_eq!(config.delay_after(3), Duration::from_millis(40));
        assert_eq!(config.delay_after(4), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let config = RetryConfig::default();
        let result = retry_with_backoff(
            || async { Ok::<_, String>(42) },
            &config,
            "test_operation",
        )
        .await;

        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let config = RetryConfig::linear(5, Duration::from_millis(1));
        let attempts = Arc::new(Mutex::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    let mut count = attempts.lock().unwrap();
                    *count += 1;
                    if *count < 3 {
                        Err(format!("Attempt {}", *count))
                    } else {
                        Ok(42)
                    }
                }
            },
            &config,
            "test_operation",
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(*attempts.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_retry_gives_up_after_max_attempts() {
        let config = RetryConfig::linear(4, Duration::from_secs(2));
        let attempts = Arc::new(Mutex::new(0));
        let attempts_clone = attempts.clone();
        let start = tokio::time::Instant::now();

        let result = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    *attempts.lock().unwrap() += 1;
                    Err::<i32, _>("connection refused")
                }
            },
            &config,
            "test_operation",
        )
        .await;

        assert_eq!(result, Err("connection refused"));
        assert_eq!(*attempts.lock().unwrap(), 4);
        // 2s + 4s + 6s, nothing after the last attempt
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(12));
        assert!(elapsed < Duration::from_secs(13));
    }
}
