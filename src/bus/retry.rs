//! Exponential backoff for connecting to the message bus.
//!
//! - Default: 3 retries with 2s, 4s, 8s delays
//!
//! Every error is treated as transient; once the retries are spent the last
//! error is returned to the caller.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (cap for exponential growth).
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (typically 2.0).
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// 3 retries with 2s, 4s, 8s delays.
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(16),
        backoff_multiplier: 2.0,
    };

    /// A single attempt, no retries.
    pub const NONE: Self = Self {
        max_retries: 0,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        backoff_multiplier: 1.0,
    };

    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Computes the delay for the given retry attempt (0-indexed).
    ///
    /// `initial_delay * backoff_multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped_secs)
    }

    /// Returns an iterator over all retry delays.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }

    /// Computes the total maximum wait time for all retries.
    pub fn total_max_wait(&self) -> Duration {
        self.delays().sum()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Runs `operation` until it succeeds or the retries in `config` are spent.
///
/// `what` names the operation in log lines.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: RetryConfig,
    what: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt - 1);
                warn!(
                    operation = what,
                    attempt,
                    max_attempts,
                    delay = ?delay,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig::new(
            max_retries,
            Duration::from_millis(1),
            Duration::from_millis(10),
            2.0,
        )
    }

    #[test]
    fn default_delays_are_2_4_8() {
        let delays: Vec<_> = RetryConfig::DEFAULT.delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
        assert_eq!(RetryConfig::DEFAULT.total_max_wait(), Duration::from_secs(14));
    }

    #[test]
    fn none_has_no_delays() {
        assert_eq!(RetryConfig::NONE.delays().count(), 0);
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(RetryConfig::DEFAULT, "test", move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(fast(3), "test", move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err("connection refused".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), String> = retry_with_backoff(fast(2), "test", move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("failure {count}")) }
        })
        .await;

        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn no_retries_means_one_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), &str> = retry_with_backoff(RetryConfig::NONE, "test", move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err("down") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn delay_sequence_is_monotonic_and_capped(
            initial_ms in 1u64..1000,
            max_ms in 1000u64..60000,
            multiplier in 1.5f64..3.0,
            max_retries in 1u32..15,
        ) {
            let config = RetryConfig::new(
                max_retries,
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
                multiplier,
            );

            let delays: Vec<_> = config.delays().collect();
            prop_assert_eq!(delays[0], Duration::from_millis(initial_ms));
            for window in delays.windows(2) {
                prop_assert!(window[1] >= window[0]);
            }
            for delay in &delays {
                prop_assert!(*delay <= Duration::from_millis(max_ms));
            }
        }
    }
}
