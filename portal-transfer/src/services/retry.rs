//! Bounded retry with a fixed delay
//!
//! The failures this guards against are UI timing races in the remote
//! portal (a panel not interactive yet, a search result not rendered yet),
//! not load-related backpressure, so the delay is fixed: no jitter, no
//! exponential backoff. Nothing is retained between calls.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Retry configuration for one call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; values below 1 mean 1
    pub max_attempts: u32,
    /// Pause between a failed attempt and the next one
    pub delay: Duration,
    /// Diagnostic label used in logs and in the exhausted error
    pub label: String,
}

impl RetryPolicy {
    pub fn new(label: impl Into<String>, max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            label: label.into(),
        }
    }

    /// Same attempts and delay under a different label
    pub fn labeled(&self, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..self.clone()
        }
    }

    /// Run `operation` under this policy
    pub async fn run<F, Fut, T, E>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        retry(operation, self.max_attempts, self.delay, &self.label).await
    }

    /// Run `operation`, giving up early on errors `is_retryable` refuses
    pub async fn run_while<F, Fut, T, E, P>(
        &self,
        operation: F,
        is_retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        retry_while(operation, is_retryable, self.max_attempts, self.delay, &self.label).await
    }
}

/// Returned when every attempt failed; wraps the last underlying error
#[derive(Debug, Error)]
#[error("{label} failed after {attempts} attempt(s): {source}")]
pub struct RetryError<E> {
    pub label: String,
    pub attempts: u32,
    #[source]
    pub source: E,
}

/// Attempt `operation` up to `max_attempts` times
///
/// After a failed attempt the failure is logged with the attempt number
/// and `label`, then the call sleeps `delay` and tries again. When the
/// attempts are exhausted the last error is returned wrapped in
/// [`RetryError`].
pub async fn retry<F, Fut, T, E>(
    operation: F,
    max_attempts: u32,
    delay: Duration,
    label: &str,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_while(operation, |_| true, max_attempts, delay, label).await
}

/// Like [`retry`], but an error for which `is_retryable` returns false
/// ends the loop at once
pub async fn retry_while<F, Fut, T, E, P>(
    mut operation: F,
    is_retryable: P,
    max_attempts: u32,
    delay: Duration,
    label: &str,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(label, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt >= max_attempts || !is_retryable(&err) => {
                tracing::warn!(
                    label,
                    attempt,
                    max_attempts,
                    error = %err,
                    "Operation failed, not retrying"
                );
                return Err(RetryError {
                    label: label.to_string(),
                    attempts: attempt,
                    source: err,
                });
            }
            Err(err) => {
                tracing::debug!(
                    label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, will retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
