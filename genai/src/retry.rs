//! Retry-with-backoff policy for the single-shot provider call.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::provider::GenerationError;

/// Backoff policy: rate-limit errors are retried with a provider hint or
/// exponential delay; every other error propagates immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempt cap, including the first call.
    pub max_attempts: u32,
    /// Seed delay for exponential backoff, doubled per attempt.
    pub base_delay: Duration,
    /// Fixed safety margin added on top of a provider retry hint.
    pub hint_margin: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(4),
            hint_margin: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy with near-zero delays, for tests.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            hint_margin: Duration::from_millis(1),
        }
    }

    /// Delay before retrying after the given zero-based attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, hint_secs: Option<f64>) -> Duration {
        hint_secs.map_or_else(
            || self.base_delay.saturating_mul(1 << attempt.min(16)),
            |secs| Duration::from_secs_f64(secs.max(0.0)) + self.hint_margin,
        )
    }

    /// Runs the operation under this policy. On a rate-limit error the call
    /// sleeps within the current flow only and tries again, up to
    /// `max_attempts` total calls; the last error propagates once attempts
    /// are exhausted.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, GenerationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GenerationError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(GenerationError::RateLimited {
                    retry_after_secs,
                    message,
                }) if attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt, retry_after_secs);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        %message,
                        "provider rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rate_limited(hint: Option<f64>) -> GenerationError {
        GenerationError::RateLimited {
            retry_after_secs: hint,
            message: "slow down".to_string(),
        }
    }

    #[tokio::test]
    async fn two_rate_limits_then_success_makes_three_calls() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::immediate()
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(rate_limited(None))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn five_rate_limits_exhaust_and_propagate() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate()
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(rate_limited(Some(0.001))) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(matches!(
            result,
            Err(GenerationError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn non_rate_limit_errors_propagate_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate()
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(GenerationError::Upstream {
                        status: 500,
                        message: "boom".to_string(),
                    })
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(GenerationError::Upstream { .. })));
    }

    #[test]
    fn hint_beats_exponential_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(4),
            hint_margin: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(0, None), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2, None), Duration::from_secs(16));
        assert_eq!(policy.delay_for(2, Some(2.0)), Duration::from_secs(3));
    }
}
