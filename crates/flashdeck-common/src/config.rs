//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::{LifecycleError, Result};

/// Lifecycle coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Prefix shared by every cache region the application owns
    pub cache_prefix: String,

    /// Version suffix of the current cache region
    pub cache_version: String,

    /// Fallback document stored for offline use
    pub offline_page_url: String,

    /// Same-origin, always-available resource used by the quality probe
    pub probe_url: String,

    /// Probes slower than this are classified as slow
    pub slow_threshold_ms: u64,

    /// Probes still pending after this are classified as offline
    pub probe_timeout_ms: u64,

    /// Upper bound on the skip-waiting hand-off to the waiting worker
    pub handoff_timeout_ms: u64,

    /// Retry policy for the offline page pre-warm
    pub offline_page_retry: RetrySettings,

    /// User agent sent by the HTTP fetcher
    pub user_agent: String,

    /// Origin used to resolve relative URLs
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of attempts
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,

    /// Upper bound on the delay between retries, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "flashdeck".to_string(),
            cache_version: "v1".to_string(),
            offline_page_url: "/offline.html".to_string(),
            probe_url: "/favicon.ico".to_string(),
            slow_threshold_ms: 1000,
            probe_timeout_ms: 10_000,
            handoff_timeout_ms: 5_000,
            offline_page_retry: RetrySettings::default(),
            user_agent: format!("Flashdeck/{}", env!("CARGO_PKG_VERSION")),
            base_url: "http://localhost/".to_string(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 2_000,
        }
    }
}

impl LifecycleConfig {
    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check invariants the managers rely on.
    pub fn validate(&self) -> Result<()> {
        if self.cache_prefix.is_empty() {
            return Err(LifecycleError::config("cache_prefix must not be empty"));
        }
        if self.cache_version.is_empty() {
            return Err(LifecycleError::config("cache_version must not be empty"));
        }
        if self.slow_threshold_ms == 0 {
            return Err(LifecycleError::config("slow_threshold_ms must be positive"));
        }
        if self.probe_timeout_ms == 0 || self.handoff_timeout_ms == 0 {
            return Err(LifecycleError::config("timeouts must be positive"));
        }
        let base = self.base()?;
        for (field, value) in [
            ("probe_url", &self.probe_url),
            ("offline_page_url", &self.offline_page_url),
        ] {
            base.join(value)
                .map_err(|e| LifecycleError::config(format!("{field}: {e}")))?;
        }
        Ok(())
    }

    /// Name of the current versioned cache region.
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.cache_version)
    }

    /// Whether a cache region belongs to this application.
    pub fn owns_cache(&self, name: &str) -> bool {
        name.strip_prefix(&self.cache_prefix)
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Resolve a possibly relative URL against `base_url`.
    pub fn resolve(&self, url: &str) -> Result<Url> {
        self.base()?
            .join(url)
            .map_err(|e| LifecycleError::config(format!("{url}: {e}")))
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }

    fn base(&self) -> Result<Url> {
        Url::parse(&self.base_url)
            .map_err(|e| LifecycleError::config(format!("base_url: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = LifecycleConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_name(), "flashdeck-v1");
        assert_eq!(config.slow_threshold(), Duration::from_millis(1000));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = LifecycleConfig::from_json_str(r#"{"cache_version": "v7"}"#).unwrap();
        assert_eq!(config.cache_name(), "flashdeck-v7");
        assert_eq!(config.probe_url, "/favicon.ico");
        assert_eq!(config.offline_page_retry.max_attempts, 3);
    }

    #[test]
    fn test_rejects_empty_prefix() {
        let err = LifecycleConfig::from_json_str(r#"{"cache_prefix": ""}"#).unwrap_err();
        assert!(matches!(err, LifecycleError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_threshold() {
        let err = LifecycleConfig::from_json_str(r#"{"slow_threshold_ms": 0}"#).unwrap_err();
        assert!(matches!(err, LifecycleError::Config(_)));
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let err = LifecycleConfig::from_json_str(r#"{"base_url": "not a url"}"#).unwrap_err();
        assert!(matches!(err, LifecycleError::Config(_)));
    }

    #[test]
    fn test_malformed_json() {
        let err = LifecycleConfig::from_json_str("{").unwrap_err();
        assert_eq!(err.category(), "json");
    }

    #[test]
    fn test_owns_cache() {
        let config = LifecycleConfig::default();
        assert!(config.owns_cache("flashdeck-v1"));
        assert!(config.owns_cache("flashdeck-v0"));
        assert!(!config.owns_cache("flashdeckish-v1"));
        assert!(!config.owns_cache("other-v1"));
    }

    #[test]
    fn test_resolve_relative() {
        let config = LifecycleConfig {
            base_url: "https://cards.example/app/".to_string(),
            ..Default::default()
        };
        let url = config.resolve("/offline.html").unwrap();
        assert_eq!(url.as_str(), "https://cards.example/offline.html");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"probe_url": "/ping", "slow_threshold_ms": 250}}"#).unwrap();

        let config = LifecycleConfig::load(file.path()).unwrap();
        assert_eq!(config.probe_url, "/ping");
        assert_eq!(config.slow_threshold_ms, 250);
    }

    #[test]
    fn test_load_missing_file() {
        let err = LifecycleConfig::load("/nonexistent/flashdeck.json").unwrap_err();
        assert!(matches!(err, LifecycleError::Io(_)));
    }
}
