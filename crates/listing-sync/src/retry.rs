//! Exponential backoff retry logic for remote calls.

use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult, MutationError, MutationResult};

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Maximum delay cap, also applied to server-provided `Retry-After`.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Result of a retried operation together with how many calls were made.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: T,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Create a new retry policy with the given max retries and base delay.
    /// The maximum delay cap defaults to 60 seconds.
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Set the maximum delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Whether another attempt is allowed after `attempt` failed attempts.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, retryable: bool) -> bool {
        retryable && attempt < self.max_retries
    }

    /// Calculate delay for the given attempt using exponential backoff.
    ///
    /// A server-provided `retry_after` is used directly (capped at
    /// `max_delay`). Otherwise the delay is
    /// `min(base_delay * 2^attempt, max_delay)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after {
            return wait.min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Execute a mutation with retry.
    ///
    /// The closure is called until it succeeds, fails with a non-retryable
    /// error, or the retry budget is spent. The number of calls made is
    /// returned alongside the outcome.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut f: F) -> Attempted<MutationResult<T>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ApiError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await.map_err(MutationError::from) {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt + 1,
                    };
                }
                Err(error) => {
                    if !self.should_retry(attempt, error.retryable()) {
                        if error.retryable() {
                            warn!(
                                operation = operation_name,
                                attempts = attempt + 1,
                                error = %error,
                                "Max retries exceeded"
                            );
                        }
                        return Attempted {
                            result: Err(error),
                            attempts: attempt + 1,
                        };
                    }

                    let delay = self.delay_for(attempt, error.retry_after);
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after transient error"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Execute a read with retry, keeping the transport error type.
    pub async fn execute_read<F, Fut, T>(&self, operation_name: &str, mut f: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ApiResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !self.should_retry(attempt, error.is_retryable()) {
                        return Err(error);
                    }
                    let delay = self.delay_for(attempt, error.retry_after());
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying read after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
