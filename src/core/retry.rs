//! Exponential-backoff retry wrapper with an error taxonomy (C3).

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// 408, 429, and the 5xx family: safe to retry.
pub const RETRYABLE_STATUS_CODES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Client errors that a retry cannot fix.
pub const FATAL_STATUS_CODES: &[u16] = &[400, 401, 403, 404, 422];

/// A classified outcome of one attempt, used to decide whether to
/// retry and how long to wait.
#[derive(Debug, Clone, Copy)]
pub enum Classification {
    /// Network-layer failure: timeout, reset, read error.
    RetryableTransport,
    /// An HTTP status in `RETRYABLE_STATUS_CODES`, with an optional
    /// `Retry-After` hint in seconds.
    RetryableStatus { retry_after_secs: Option<u64> },
    /// An HTTP status in `FATAL_STATUS_CODES`, or any other error the
    /// caller has determined is not worth retrying.
    Fatal,
}

/// Policy parameters for [`retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub exponential_base: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            exponential_base: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.exponential_base.powi(attempt as i32 - 1);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

/// Run `op` under `policy`, classifying each failure via `classify`.
/// Retries on `RetryableTransport`/`RetryableStatus`, sleeping for
/// `min(base * exponential_base^(attempt-1), max_delay)`, or at least
/// the `Retry-After` hint when present. Fails immediately on `Fatal`.
/// After `max_attempts`, returns `Error::RetryExhausted`.
pub async fn retry<T, E, F, Fut, C>(
    policy: RetryPolicy,
    mut op: F,
    classify: C,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    C: Fn(&E) -> Classification,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let classification = classify(&e);
                let message = e.to_string();
                match classification {
                    Classification::Fatal => return Err(Error::RetryExhausted {
                        attempts: attempt,
                        source: message,
                    }),
                    _ if attempt >= policy.max_attempts => {
                        return Err(Error::RetryExhausted {
                            attempts: attempt,
                            source: message,
                        })
                    }
                    Classification::RetryableTransport => {
                        let delay = policy.delay_for_attempt(attempt);
                        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %message, "retrying after transport error");
                        tokio::time::sleep(delay).await;
                    }
                    Classification::RetryableStatus { retry_after_secs } => {
                        let computed = policy.delay_for_attempt(attempt);
                        let delay = match retry_after_secs {
                            Some(secs) => computed.max(Duration::from_secs(secs)),
                            None => computed,
                        };
                        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %message, "retrying after retryable status");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(5),
            exponential_base: 2.0,
            max_delay: Duration::from_secs(60),
        };
        let delays: Vec<u64> = (1..=7)
            .map(|a| policy.delay_for_attempt(a).as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60, 60]);
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry(
            RetryPolicy::default(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<u32, String>(42) }
            },
            |_: &String| Classification::Fatal,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            exponential_base: 1.0,
            max_delay: Duration::from_millis(5),
        };
        let result: Result<u32> = retry(
            policy,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("boom".to_string())
                    } else {
                        Ok(7)
                    }
                }
            },
            |_: &String| Classification::RetryableTransport,
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry(
            RetryPolicy::default(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, String>("404".to_string()) }
            },
            |_: &String| Classification::Fatal,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            exponential_base: 1.0,
            max_delay: Duration::from_millis(2),
        };
        let result: Result<u32> = retry(
            policy,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, String>("timeout".to_string()) }
            },
            |_: &String| Classification::RetryableTransport,
        )
        .await;
        assert!(matches!(result, Err(Error::RetryExhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
