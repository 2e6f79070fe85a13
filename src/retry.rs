//! Retry logic with a fixed back-off
//!
//! Download attempts and rate-limited platform calls are retried a bounded
//! number of times, sleeping a fixed delay between attempts. Whether an error
//! is worth another attempt is decided by its [`IsRetryable`] implementation.
//!
//! # Example
//!
//! ```no_run
//! use chat_media_dl::retry::{IsRetryable, RetryConfig, download_with_retry};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::new(3, Duration::from_secs(5));
//! download_with_retry(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::PlatformError;
use crate::types::{DownloadFailure, FailureReason};
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network errors, error statuses, rate limits) should return `true`.
/// Failures that another attempt cannot fix, or would make worse, should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for DownloadFailure {
    fn is_retryable(&self) -> bool {
        // The file is already on disk; another attempt would write a second copy
        self.reason != FailureReason::RecordWrite
    }
}

impl IsRetryable for PlatformError {
    fn is_retryable(&self) -> bool {
        matches!(self, PlatformError::RateLimited)
    }
}

/// How many times to try and how long to wait in between
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts including the first (values below 1 are treated as 1)
    pub max_attempts: u32,
    /// Sleep between attempts
    pub delay: Duration,
}

impl RetryConfig {
    /// Retry configuration with `max_attempts` total attempts and a fixed `delay`
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Execute an async operation, retrying retryable errors with a fixed delay
///
/// Returns the first success, the first non-retryable error, or the last
/// error once `config.max_attempts` attempts have been made.
pub async fn download_with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = config.delay.as_millis(),
                    "Operation failed, retrying"
                );
                tokio::time::sleep(config.delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}
