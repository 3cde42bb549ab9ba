//! Retry with linear backoff that yields to cancellation.
//!
//! Uploads to the messaging platform fail transiently (flood waits, dropped
//! connections). Attempt `n` that fails waits `n * backoff_unit` before the
//! next one, and the wait ends early if the job's cancel token fires.

use std::future::Future;
use std::time::Duration;

use relay_media::CancelToken;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after attempt `n` is `n * backoff_unit`.
    pub backoff_unit: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(2),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff_unit(mut self, backoff_unit: Duration) -> Self {
        self.backoff_unit = backoff_unit;
        self
    }

    /// Delay after the given (1-based) failed attempt.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(attempt)
    }
}

/// Result of a retry operation.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded.
    Success(T),
    /// Every attempt failed; `error` is the last one.
    Failed { error: E, attempts: u32 },
    /// The cancel token fired before or between attempts.
    Cancelled { attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success(_))
    }

    /// Number of attempts actually made.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryResult::Success(_) => None,
            RetryResult::Failed { attempts, .. } | RetryResult::Cancelled { attempts } => {
                Some(*attempts)
            }
        }
    }
}

/// Run `operation` until it succeeds, attempts run out, or `cancel` fires.
///
/// The closure receives the 1-based attempt number. An error for which
/// `is_cancel` returns true stops retrying immediately.
pub async fn retry_with_cancel<F, Fut, T, E, C>(
    config: &RetryConfig,
    cancel: &CancelToken,
    is_cancel: C,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return RetryResult::Cancelled { attempts: attempt };
        }
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) if is_cancel(&e) => return RetryResult::Cancelled { attempts: attempt },
            Err(e) if attempt < max_attempts => {
                let delay = config.delay_after_attempt(attempt);
                warn!(
                    "{} attempt {}/{} failed, retrying in {:?}: {}",
                    config.operation_name, attempt, max_attempts, delay, e
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("{} cancelled during backoff", config.operation_name);
                        return RetryResult::Cancelled { attempts: attempt };
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                return RetryResult::Failed {
                    error: e,
                    attempts: attempt,
                }
            }
        }
    }
}
