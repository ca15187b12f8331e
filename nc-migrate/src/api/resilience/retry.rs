//! Retry with exponential backoff

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;

use crate::api::error::{ClientError, ClientErrorKind};

/// Retry settings
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Randomise delays to between half and all of the computed value
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff before retry number `retry` (1-based)
    ///
    /// A server-provided `Retry-After` replaces the computed delay but is
    /// still capped by `max_delay`.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after {
            return wait.min(self.config.max_delay);
        }

        let exponent = retry.saturating_sub(1) as i32;
        let millis = self.config.base_delay.as_millis() as f64
            * self.config.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.config.max_delay.as_millis() as f64).max(0.0);

        let millis = if self.config.jitter && capped > 0.0 {
            rand::rng().random_range(capped / 2.0..=capped)
        } else {
            capped
        };
        Duration::from_millis(millis as u64)
    }

    /// Whether `error` from attempt number `attempt` deserves another try
    ///
    /// Requests that are not idempotent are only retried when the server
    /// refused them outright (429), never after a timeout or a 5xx that may
    /// have left a half-applied write behind.
    pub fn should_retry(&self, error: &ClientError, attempt: u32, idempotent: bool) -> bool {
        if attempt >= self.config.max_attempts {
            return false;
        }
        if idempotent {
            error.is_retryable()
        } else {
            error.kind == ClientErrorKind::RateLimited
        }
    }

    /// Run `operation` until it succeeds, fails permanently or attempts run out
    pub async fn execute<F, Fut, T>(&self, what: &str, idempotent: bool, mut operation: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(&e, attempt, idempotent) => {
                    let delay = self.delay_for(attempt, e.retry_after);
                    warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        what, attempt, self.config.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!("{} failed after {} attempts: {}", what, attempt, e);
                    return Err(e);
                }
            }
        }
    }
}
