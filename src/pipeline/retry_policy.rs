//! Retry policy for storage operations.
//!
//! Implements exponential backoff with configurable parameters. Only errors
//! classified as [`ErrorClass::Retryable`] are retried.

use super::error::{ErrorClass, PipelineError};
use crate::metrics;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` (zero-based) failed.
    ///
    /// `initial_backoff * multiplier^attempt`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let backoff = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = backoff.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Whether an error on zero-based `attempt` deserves another attempt.
    pub fn should_retry(&self, error: &PipelineError, attempt: u32) -> bool {
        error.class() == ErrorClass::Retryable && attempt + 1 < self.max_attempts
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// attempts are exhausted. Attempts and backoff sleeps race `cancel`.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                result = op() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.should_retry(&err, attempt) {
                return Err(err);
            }

            let delay = self.backoff(attempt);
            warn!(
                "{} attempt {}/{} failed, retrying in {:?}: {}",
                operation,
                attempt + 1,
                self.max_attempts,
                delay,
                err
            );
            metrics::record_retry(operation);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}
