//! `reqwest`-backed [`Fetcher`] for hosts with a real network.

use std::time::Duration;

use async_trait::async_trait;
use flashdeck_common::LifecycleConfig;
use hashbrown::HashMap;
use http::header::{CACHE_CONTROL, PRAGMA};
use reqwest::Client;
use tracing::{debug, info, trace};

use crate::fetch::{CacheMode, FetchRequest, FetchResponse, Fetcher};
use crate::{PlatformError, PlatformResult};

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: LifecycleConfig::default().user_agent,
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

impl From<&LifecycleConfig> for FetcherConfig {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            ..Default::default()
        }
    }
}

/// HTTP fetcher.
pub struct HttpFetcher {
    client: Client,
    config: FetcherConfig,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: FetcherConfig) -> PlatformResult<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| PlatformError::Network(e.to_string()))?;

        info!(user_agent = %config.user_agent, "HttpFetcher initialized");

        Ok(Self { client, config })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> PlatformResult<FetchResponse> {
        debug!(url = %request.url, cache = ?request.cache, "Fetching resource");

        let mut req_builder = self.client.get(request.url.clone());

        req_builder = match request.cache {
            CacheMode::Default => req_builder,
            CacheMode::NoStore => req_builder.header(CACHE_CONTROL, "no-store"),
            CacheMode::Reload => req_builder
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache"),
        };

        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                PlatformError::Timeout(timeout)
            } else {
                PlatformError::Network(e.to_string())
            }
        };

        let response = req_builder.send().await.map_err(map_err)?;

        let status = response.status().as_u16();
        let url = response.url().clone();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(map_err)?;

        trace!(url = %url, status, body_len = body.len(), "Response received");

        Ok(FetchResponse {
            url,
            status,
            headers,
            body,
        })
    }
}
