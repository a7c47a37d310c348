//! Retry and timeout utilities.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::LifecycleError;

/// Exponential backoff policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for any single wait.
    pub max_delay: Duration,
    /// Growth factor between consecutive waits.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Wait before the given retry (1 = first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or the policy's attempts are spent,
/// sleeping with exponential backoff in between. Returns the last error.
pub async fn retry_with_backoff<T, E, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_if(config, operation, |_| true).await
}

/// Like [`retry_with_backoff`], but gives up immediately on any error that
/// `should_retry` rejects.
pub async fn retry_with_backoff_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let attempts = config.max_attempts.max(1);
    let mut retry = 0;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if retry > 0 {
                    debug!(retries = retry, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !should_retry(&error) {
            debug!(error = %error, "Error is not retryable");
            return Err(error);
        }

        retry += 1;
        if retry >= attempts {
            warn!(attempts, error = %error, "Giving up");
            return Err(error);
        }

        let delay = config.backoff(retry);
        warn!(attempt = retry, attempts, error = %error, ?delay, "Attempt failed, retrying");
        sleep(delay).await;
    }
}

/// Bound a future by `timeout`, reporting expiry as [`LifecycleError::Timeout`].
pub async fn with_timeout<T, Fut>(timeout: Duration, future: Fut) -> Result<T, LifecycleError>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| LifecycleError::Timeout(timeout))
}
