//! Retry policy with exponential backoff for model backend calls.
//!
//! Every attempt runs under a per-call timeout. An attempt that exceeds it
//! fails with `BackendError::Timeout`, which is transient and therefore
//! retried, while logical failures such as an unknown model are returned
//! immediately.
//!
//! Backoff doubles with each retry and is capped:
//! 200ms → 400ms → 800ms → ... → max_backoff_ms

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::BackendError;
use crate::domain::models::RetryConfig;

/// Terminal failure of a retried operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetryError {
    /// The last attempt failed and no further retry was allowed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The cancellation token fired before the next attempt.
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

/// Retry policy configuration for handling transient backend errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    max_retries: u32,
    /// Initial backoff duration in milliseconds
    initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds
    max_backoff_ms: u64,
    /// Deadline for a single attempt
    call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(
        max_retries: u32,
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
        call_timeout: Duration,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
            max_backoff_ms: max_backoff_ms.max(initial_backoff_ms),
            call_timeout,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            config.initial_backoff_ms,
            config.max_backoff_ms,
            Duration::from_millis(config.call_timeout_ms),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Execute an operation with timeout and exponential backoff.
    ///
    /// The token is checked before every attempt and while backing off. An
    /// attempt already in flight is allowed to finish or time out.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }

            let outcome = match timeout(self.call_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(self.call_timeout)),
            };

            match outcome {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !self.should_retry(&err, attempt) {
                        if attempt >= self.max_retries && err.is_transient() {
                            warn!("Operation failed after {} attempts: {}", attempt + 1, err);
                        } else {
                            debug!("Permanent error, not retrying: {}", err);
                        }
                        return Err(err.into());
                    }

                    let backoff = self.calculate_backoff(attempt);
                    warn!(
                        "Attempt {} failed with transient error: {}. Retrying in {:?}...",
                        attempt + 1,
                        err,
                        backoff
                    );

                    tokio::select! {
                        () = cancel.cancelled() => {
                            return Err(RetryError::Cancelled { attempts: attempt + 1 });
                        }
                        () = sleep(backoff) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Calculate exponential backoff duration for a given attempt
    ///
    /// Formula: min(initial_backoff * 2^attempt, max_backoff)
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        let backoff_ms = self
            .initial_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_backoff_ms);

        Duration::from_millis(backoff_ms)
    }

    fn should_retry(&self, err: &BackendError, attempt: u32) -> bool {
        attempt < self.max_retries && err.is_transient()
    }
}
