//! Retry policy for transient API failures.
//!
//! Wraps an API call with full-jitter exponential backoff, bounded by a
//! wall-clock ceiling rather than an attempt count. Whether a failure is worth
//! retrying at all is [`ApiError::is_retryable`]'s decision.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

use crate::api::ApiError;
use crate::error::Error;

/// Backoff settings for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total wall-clock budget across all attempts of one call.
    pub ceiling: Duration,

    /// Exponential base of the backoff curve.
    pub base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            ceiling: Duration::from_secs(15),
            base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// The wait after `attempt` failed attempts: `base^(attempt-1)` seconds
    /// plus up to one second of jitter, clamped so the total never overshoots
    /// the ceiling. A wait too large to represent counts as the full remaining
    /// budget.
    #[must_use]
    pub fn backoff(&self, attempt: u32, elapsed: Duration) -> Duration {
        let remaining = self.ceiling.saturating_sub(elapsed);
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let jitter: f64 = rand::thread_rng().gen();
        let seconds = self.base.powi(exponent) + jitter;

        if !seconds.is_finite() || seconds > remaining.as_secs_f64() {
            return remaining;
        }
        Duration::from_secs_f64(seconds)
    }
}

/// Run `op` until it succeeds, fails permanently, or the retry budget runs out.
///
/// # Errors
///
/// Returns `Error::Api` for a failure not worth retrying, or
/// `Error::RetryLimitExceeded` wrapping the last failure once the wall-clock
/// ceiling is reached.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, name: &str, mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => {
                debug!("{name}: permanent failure: {err}");
                return Err(Error::Api(err));
            }
            Err(err) => {
                let elapsed = started.elapsed();
                if elapsed >= policy.ceiling {
                    debug!("{name}: retry budget exhausted after {attempt} attempts: {err}");
                    return Err(Error::RetryLimitExceeded {
                        elapsed,
                        source: err,
                    });
                }

                let wait = policy.backoff(attempt, elapsed);
                debug!("{name}: attempt {attempt} failed ({err}), retrying in {wait:?}");
                tokio::time::sleep(wait).await;
            }
        }
    }
}
