//! Retry policy with exponential backoff
//!
//! Only transient remote failures (rate limiting, 5xx, connection
//! failures) are retried. A rate-limit response carrying Retry-After overrides the
//! computed backoff.

use anyhow::Result;
use log::{debug, warn};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::api::error::RemoteError;

/// Retry timing configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Add up to 25% random variation to each delay
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

/// Errors that know whether they are worth retrying
pub trait RetryableError {
    fn is_retryable(&self) -> bool;

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl RetryableError for RemoteError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    fn retry_after(&self) -> Option<Duration> {
        RemoteError::retry_after(self)
    }
}

impl RetryableError for anyhow::Error {
    fn is_retryable(&self) -> bool {
        self.downcast_ref::<RemoteError>()
            .is_some_and(RemoteError::is_transient)
    }

    fn retry_after(&self) -> Option<Duration> {
        self.downcast_ref::<RemoteError>()
            .and_then(RemoteError::retry_after)
    }
}

/// Executes remote operations under a [`RetryConfig`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Backoff before the given retry (1 = first retry), before jitter
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let millis = self.config.base_delay.as_millis() as f64
            * self.config.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.config.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn delay_for(&self, retry: u32, error: &anyhow::Error) -> Duration {
        if let Some(wait) = error.retry_after() {
            return wait.min(self.config.max_delay);
        }

        let delay = self.base_delay_for(retry);
        let millis = delay.as_millis() as u64;
        if self.config.jitter && millis > 0 {
            let jitter = rand::rng().random_range(0..=millis / 4);
            Duration::from_millis(millis + jitter)
        } else {
            delay
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt, &err);
                    warn!(
                        "{} failed (attempt {}/{}): {:#}; retrying in {:?}",
                        operation, attempt, max_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
