//! Timeouts and bounded exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;

use crate::error::ProviderError;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay, clamped to `max_delay`.
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Runs a provider call under a timeout. An elapsed timer becomes
/// [`ProviderError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(limit)),
    }
}

/// Calls `op` until it succeeds, fails permanently, or `max_attempts`
/// transient failures have been seen. Each attempt is bounded by `limit`.
///
/// `on_retry` runs before each wait with the failed attempt number.
pub async fn retry_transient<T, F, Fut, R>(
    max_attempts: u32,
    limit: Duration,
    backoff: &BackoffConfig,
    mut op: F,
    on_retry: R,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
    R: Fn(u32, &ProviderError),
{
    let mut delay = backoff.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match with_timeout(limit, op()).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts.max(1) => {
                on_retry(attempt, &e);
                tokio::time::sleep(delay).await;
                delay = next_delay(delay, backoff);
            }
            Err(e) => return Err(e),
        }
    }
}
