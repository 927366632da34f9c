//! Retry with exponential backoff
//!
//! Retries transient failures and gives up immediately on failures that stay
//! failed until a new session is established.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classifier::{self, ErrorKind};
use crate::error::Error;

/// Default number of attempts for mutating operations
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff (in milliseconds)
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Message fragments that mark a failure as non-retryable
const NON_RETRYABLE_PATTERNS: &[&str] = &[
    "authentication",
    "unauthorized",
    "invalid principal",
    "delegation",
    "permission denied",
];

/// Errors the retry loop can inspect
pub trait RetryableError: fmt::Display {
    /// Kind taken from structured data, when the error carries any
    fn structured_kind(&self) -> Option<ErrorKind> {
        None
    }
}

impl RetryableError for Error {
    fn structured_kind(&self) -> Option<ErrorKind> {
        classifier::structured_kind(self)
    }
}

impl RetryableError for String {}

/// Whether the message alone marks the failure as permanent
pub fn is_non_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    NON_RETRYABLE_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

/// Decide whether a failed attempt may be retried
pub fn should_retry<E: RetryableError>(error: &E) -> bool {
    if error.structured_kind().is_some_and(|kind| kind.is_permanent()) {
        return false;
    }
    !is_non_retryable_message(&error.to_string())
}

/// Backoff before the attempt following `attempt` (1-based)
pub fn backoff_delay(base_delay: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base_delay.saturating_mul(factor)
}

/// Attempt budget and backoff base for one class of operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::mutation()
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
        }
    }

    /// Budget for mutating operations (3 attempts, 1s base)
    pub fn mutation() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }

    /// Budget for balance reads (2 attempts, 1s base)
    pub fn balance_read() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Run `operation` under this policy
    pub async fn run<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        E: RetryableError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        with_retry(operation, self.max_attempts, self.base_delay()).await
    }
}

/// Retry `operation` up to `max_attempts` times
///
/// Waits `base_delay * 2^(attempt - 1)` between attempts. Returns the last
/// error unchanged once the budget is exhausted or the failure is permanent.
pub async fn with_retry<T, E, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<T, E>
where
    E: RetryableError,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt >= max_attempts => {
                warn!(attempt, error = %err, "Retry budget exhausted");
                return Err(err);
            }
            Err(err) if !should_retry(&err) => {
                warn!(attempt, error = %err, "Non-retryable failure, giving up");
                return Err(err);
            }
            Err(err) => {
                let delay = backoff_delay(base_delay, attempt);
                warn!(
                    attempt,
                    max_attempts,
                    wait_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_op(
        calls: Arc<AtomicU32>,
        failures: u32,
        message: &'static str,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<&'static str, Error>> + Send>>
    {
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= failures {
                    Err(Error::Other(message.to_string()))
                } else {
                    Ok("done")
                }
            })
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_two_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = counting_op(calls.clone(), 2, "connection reset");

        let result = with_retry(op, 3, Duration::from_millis(10)).await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_authentication_failure_aborts_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = counting_op(calls.clone(), 5, "Authentication failed for caller");

        let result = with_retry(op, 3, Duration::from_millis(10)).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error_unchanged() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = counting_op(calls.clone(), 10, "replica unavailable");

        let result = with_retry(op, 3, Duration::from_millis(10)).await;

        match result {
            Err(Error::Other(msg)) => assert_eq!(msg, "replica unavailable"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_structured_permanent_kind_aborts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), Error> = with_retry(
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(Error::Api {
                        status: 409,
                        code: Some("INSUFFICIENT_FUNDS".to_string()),
                        message: "balance 0".to_string(),
                        details: None,
                    })
                }
            },
            3,
            Duration::from_millis(10),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_exponential() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = counting_op(calls.clone(), 2, "timeout");
        let started = tokio::time::Instant::now();

        let result = with_retry(op, 3, Duration::from_millis(1000)).await;

        assert!(result.is_ok());
        // 1000ms after the first failure, 2000ms after the second
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(3000));
        assert!(elapsed < Duration::from_millis(3100));
    }

    #[tokio::test]
    async fn test_policy_run_uses_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let op = counting_op(calls.clone(), 10, "network down");
        let policy = RetryPolicy::new(2, Duration::from_millis(5));

        let result = policy.run(op).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_backoff_delay() {
        let base = Duration::from_millis(1000);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(4000));
    }

    #[test]
    fn test_non_retryable_messages() {
        assert!(is_non_retryable_message("UNAUTHORIZED caller"));
        assert!(is_non_retryable_message("Invalid principal in request"));
        assert!(is_non_retryable_message("delegation expired"));
        assert!(is_non_retryable_message("Permission denied"));
        assert!(!is_non_retryable_message("connection reset by peer"));
    }

    #[test]
    fn test_default_policies() {
        assert_eq!(RetryPolicy::mutation().max_attempts, 3);
        assert_eq!(RetryPolicy::balance_read().max_attempts, 2);
        assert_eq!(RetryPolicy::balance_read().base_delay(), Duration::from_millis(1000));
    }
}
