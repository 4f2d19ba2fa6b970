//! Exponential backoff with jitter for transient store errors

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Upper bound on any delay
    pub max_delay_ms: u64,
    /// Growth factor per retry
    pub backoff_multiplier: f64,
    /// Fraction of the delay randomized either way
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1, // 10% jitter
        }
    }
}

/// Receives an alert when retries are exhausted
pub trait AlertHook: Send + Sync + Debug {
    /// Called once per abandoned operation
    fn alert(&self, operation: &str, error: &Error);
}

/// Alert hook that logs at error level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlert;

impl AlertHook for LogAlert {
    fn alert(&self, operation: &str, error: &Error) {
        tracing::error!(operation, error = %error, "Retries exhausted, operation abandoned");
    }
}

/// Retry driver
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Policy with default settings
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Delay before retry number `attempt + 1`, exponential with jitter
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(attempt as i32);

        let capped_delay = base_delay.min(self.config.max_delay_ms as f64);

        // Spread concurrent workers apart
        let jitter_range = capped_delay * self.config.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * jitter_range * 2.0;
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }

    /// Run `operation`, retrying transient errors. Non-transient errors
    /// return immediately; the last transient error is returned once the
    /// retries are used up.
    pub async fn execute_with_retry<F, Fut, T>(&self, mut operation: F, operation_name: &str) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            operation = operation_name,
                            attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.config.max_retries => {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %e,
                        "Giving up after transient failures"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.calculate_delay(attempt);
                    attempt += 1;
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
