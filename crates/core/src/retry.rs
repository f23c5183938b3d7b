//! Retry and backoff utilities
//!
//! Configurable retry with exponential backoff and jitter. The delay
//! schedule drives state-lock acquisition (where concurrent controller
//! processes contend); [`retry_async`] wraps calls against daemons that
//! may still be starting up, such as the Docker availability ping.

use std::time::Duration;
use tracing::{debug, warn};

/// Jitter strategy for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JitterStrategy {
    /// Random delay between 0 and the calculated delay
    #[default]
    FullJitter,
    /// Half the calculated delay plus a random half
    EqualJitter,
}

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Jitter strategy to apply
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: JitterStrategy::default(),
        }
    }
}

impl RetryConfig {
    /// Profile for state-lock contention: up to ten attempts, 50-500 ms.
    pub fn state_lock() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            jitter: JitterStrategy::EqualJitter,
        }
    }

    /// Delay before retry number `attempt` (0-based), with jitter applied.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .as_millis()
            .saturating_mul(2_u128.saturating_pow(attempt));
        let capped = exponential.min(self.max_delay.as_millis()) as u64;
        self.apply_jitter(Duration::from_millis(capped))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        match self.jitter {
            JitterStrategy::FullJitter => Duration::from_millis(fastrand::u64(0..=delay_ms)),
            JitterStrategy::EqualJitter => {
                let half = delay_ms / 2;
                Duration::from_millis(half + fastrand::u64(0..=half))
            }
        }
    }
}

/// Retry an async operation with backoff until it succeeds or the attempt
/// budget runs out; the final error is returned as-is.
pub async fn retry_async<T, E, Fut, Op>(
    config: &RetryConfig,
    what: &str,
    operation: Op,
) -> std::result::Result<T, E>
where
    Op: Fn() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", what, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt + 1 < config.max_attempts => {
                let delay = config.calculate_delay(attempt);
                warn!("{} failed ({}), retrying in {:?}", what, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_grow_and_stay_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            jitter: JitterStrategy::EqualJitter,
        };
        for attempt in 0..10 {
            let delay = config.calculate_delay(attempt);
            assert!(delay <= Duration::from_millis(500), "attempt {}", attempt);
        }
        // Equal jitter keeps at least half the exponential component.
        assert!(config.calculate_delay(0) >= Duration::from_millis(25));
    }

    #[test]
    fn full_jitter_never_exceeds_calculated_delay() {
        let config = RetryConfig {
            jitter: JitterStrategy::FullJitter,
            ..Default::default()
        };
        for attempt in 0..5 {
            assert!(config.calculate_delay(attempt) <= config.max_delay);
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: JitterStrategy::FullJitter,
        };
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = retry_async(&config, "flaky op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("not yet".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_last_error() {
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: JitterStrategy::FullJitter,
        };
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = retry_async(&config, "doomed op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("still broken".to_string()) }
        })
        .await;

        assert_eq!(result.unwrap_err(), "still broken");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
