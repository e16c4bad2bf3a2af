//! Full-jitter exponential backoff retry (spec.md §4.3).

use crate::error::{Error, ErrorCode, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// `base = min(initialDelayMs * backoffMultiplier^(n-1), maxDelayMs)`
    /// for 1-indexed attempt `n`.
    fn base_delay_ms(&self, attempt: u32) -> u64 {
        let scaled = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 1);
        scaled.min(self.max_delay_ms as f64) as u64
    }

    /// Full jitter: `Uniform(0, base)`.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms(attempt);
        if base == 0 {
            return Duration::ZERO;
        }
        let jittered = rand::thread_rng().gen_range(0..=base);
        Duration::from_millis(jittered)
    }
}

/// Runs `op` under the retry policy. `is_retryable` classifies a failure
/// as retryable (network/timeout/retryable-status-code) or not; a
/// non-retryable error aborts immediately. Exhaustion after `max_attempts`
/// fails with `RetryExhausted`, wrapping the final cause.
pub async fn execute<T, F, Fut>(
    config: &RetryConfig,
    mut is_retryable: impl FnMut(&Error) -> bool,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err) || attempt >= config.max_attempts {
                    if attempt >= config.max_attempts && is_retryable(&err) {
                        return Err(Error::new(
                            ErrorCode::RetryExhausted,
                            format!("retry exhausted after {attempt} attempts: {err}"),
                        )
                        .with_cause(err));
                    }
                    return Err(err);
                }

                let delay = config.jittered_delay(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 10,
            backoff_multiplier: 2.0,
        };
        let attempts = AtomicU32::new(0);

        let result: Result<&str> = execute(
            &config,
            |_| true,
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::transient("connection reset"))
                    } else {
                        Ok("ok")
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_wraps_the_final_cause() {
        let config = RetryConfig { max_attempts: 2, initial_delay_ms: 1, max_delay_ms: 5, backoff_multiplier: 2.0 };

        let result: Result<()> =
            execute(&config, |_| true, || async { Err(Error::transient("down")) }).await;

        let err = result.unwrap_err();
        assert_eq!(err.code, ErrorCode::RetryExhausted);
    }

    #[tokio::test]
    async fn non_retryable_aborts_immediately() {
        let config = RetryConfig::default();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = execute(
            &config,
            |_| false,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::invalid_event("bad payload")) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
