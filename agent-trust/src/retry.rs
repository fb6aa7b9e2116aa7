//! Bounded retry with exponential backoff for optimistic-lock conflicts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Backoff configuration for retrying conflicting writes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled on every further retry.
    pub base_delay: Duration,
    /// Ceiling applied before jitter.
    pub max_delay: Duration,
    /// Maximum extra delay as a fraction of the computed delay.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(400),
            jitter_ratio: 0.25,
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt hit a retryable error; carries the last one.
    Exhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// Error from the final attempt.
        last: E,
    },
    /// A non-retryable error stopped the loop.
    Fatal(E),
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based), given a jitter
    /// sample in `[0, 1)`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter = exponential.mul_f64(self.jitter_ratio * jitter_sample.clamp(0.0, 1.0));
        exponential + jitter
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Fatal`] for errors rejected by `is_retryable` and
    /// [`RetryError::Exhausted`] once `max_retries` retries have failed.
    pub async fn run<T, E, F, Fut>(
        &self,
        mut op: F,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0_u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if is_retryable(&err) => {
                    if attempt >= self.max_retries {
                        return Err(RetryError::Exhausted {
                            attempts: attempt + 1,
                            last: err,
                        });
                    }
                    let delay = self.backoff_delay(attempt, rand::thread_rng().r#gen::<f64>());
                    debug!(attempt, delay_ms = delay.as_millis(), "retrying after conflict");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(RetryError::Fatal(err)),
            }
        }
    }
}
