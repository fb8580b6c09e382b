use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::errors::AppError;

/// Exponential backoff with jitter for transient remote failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub base_delay_ms: u64,
    /// Jitter as a fraction of the delay, e.g. 0.25 = ±25%.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            base_delay_ms: 2000,
            jitter_factor: 0.25,
        }
    }
}

/// Run `func` until it succeeds, fails with a non-retryable error, or the
/// attempts run out. The last error is returned as-is.
pub async fn with_retry<F, Fut, T>(func: F, policy: &RetryPolicy) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match func().await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                let delay = backoff_with_jitter(attempt, policy);
                tracing::warn!(
                    "Retryable error: {}; retry {}/{} after {:?}",
                    err,
                    attempt + 1,
                    attempts - 1,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Calculate backoff delay with jitter for a given attempt.
///
/// Uses exponential backoff: base_delay * 2^attempt, plus or minus
/// `jitter_factor` of that delay.
fn backoff_with_jitter(attempt: u32, policy: &RetryPolicy) -> Duration {
    let base_delay = policy
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    let jitter_range = (base_delay as f64 * policy.jitter_factor) as u64;
    if jitter_range == 0 {
        return Duration::from_millis(base_delay);
    }
    let jitter = rand::rng().random_range(0..=jitter_range * 2) as i64 - jitter_range as i64;
    let delay_ms = (base_delay as i64 + jitter).max(0) as u64;
    Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_backoff_doubles_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            jitter_factor: 0.0,
        };
        assert_eq!(backoff_with_jitter(0, &policy), Duration::from_millis(100));
        assert_eq!(backoff_with_jitter(1, &policy), Duration::from_millis(200));
        assert_eq!(backoff_with_jitter(3, &policy), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let d = backoff_with_jitter(1, &policy).as_millis();
            assert!((3000..=5000).contains(&d), "delay {} out of band", d);
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(
            || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(AppError::ExternalServiceError("flaky".into()))
                } else {
                    Ok(n)
                }
            },
            &fast(4),
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), AppError> = with_retry(
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::ExternalServiceError("down".into()))
            },
            &fast(3),
        )
        .await;
        assert!(matches!(result, Err(AppError::ExternalServiceError(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), AppError> = with_retry(
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::ExternalRejected {
                    status: 400,
                    message: "bad".into(),
                })
            },
            &fast(5),
        )
        .await;
        assert!(matches!(result, Err(AppError::ExternalRejected { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_attempt_policy() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let _: Result<(), AppError> = with_retry(
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::ExternalServiceError("down".into()))
            },
            &fast(1),
        )
        .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
