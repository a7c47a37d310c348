//! # Flashdeck Common
//!
//! Shared error types, logging setup, configuration and retry helpers for the
//! Flashdeck application lifecycle coordinator.
//!
//! ## Features
//!
//! - Unified error taxonomy
//! - Logging configuration and setup
//! - Coordinator configuration (cache naming, probe thresholds, timeouts)
//! - Retry and timeout utilities

use std::time::Duration;
use thiserror::Error;

pub mod config;
pub mod logging;
pub mod retry;

pub use config::{LifecycleConfig, RetrySettings};
pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, retry_with_backoff_if, with_timeout, RetryConfig};

/// Unified error type for the lifecycle coordinator.
///
/// Most of these never escape a manager: action methods convert them into their
/// "nothing happened" value after logging. `NotInitialized` and
/// `AlreadyInitialized` are contract errors and are returned to the caller.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// A platform primitive is absent.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A fetch failed or answered with an error status.
    #[error("Network error: {0}")]
    Network(String),

    /// A cache region could not be read or written.
    #[error("Cache error: {0}")]
    Cache(String),

    /// The background worker rejected a request or is in the wrong state.
    #[error("Worker error: {0}")]
    Worker(String),

    /// Configuration errors.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration documents.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// A service was used before it was constructed.
    #[error("{0} used before initialization")]
    NotInitialized(&'static str),

    /// A process-wide service was constructed twice.
    #[error("{0} already initialized")]
    AlreadyInitialized(&'static str),
}

impl LifecycleError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }

    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LifecycleError::Network(_) | LifecycleError::Timeout(_) | LifecycleError::Io(_)
        )
    }

    /// Whether the error signals a defect in the calling code rather than a
    /// runtime condition.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            LifecycleError::NotInitialized(_) | LifecycleError::AlreadyInitialized(_)
        )
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            LifecycleError::Unsupported(_) => "unsupported",
            LifecycleError::Network(_) => "network",
            LifecycleError::Cache(_) => "cache",
            LifecycleError::Worker(_) => "worker",
            LifecycleError::Config(_) => "config",
            LifecycleError::Io(_) => "io",
            LifecycleError::Json(_) => "json",
            LifecycleError::Timeout(_) => "timeout",
            LifecycleError::NotInitialized(_) => "not_initialized",
            LifecycleError::AlreadyInitialized(_) => "already_initialized",
        }
    }
}

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotInitialized error naming the missing service.
    fn ok_or_not_initialized(self, service: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_initialized(self, service: &'static str) -> Result<T> {
        self.ok_or(LifecycleError::NotInitialized(service))
    }
}
