//! Network fetch seam.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use url::Url;

use crate::PlatformResult;

/// Request cache mode, mirroring `RequestInit.cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Use the HTTP cache normally.
    #[default]
    Default,
    /// Bypass the HTTP cache entirely.
    NoStore,
    /// Go to the network, then refresh the HTTP cache.
    Reload,
}

/// A request issued through a [`Fetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub cache: CacheMode,
    pub timeout: Option<Duration>,
}

impl FetchRequest {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            cache: CacheMode::Default,
            timeout: None,
        }
    }

    /// Set the cache mode.
    pub fn cache(mut self, mode: CacheMode) -> Self {
        self.cache = mode;
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Append a unique query parameter so no cache layer can answer the request.
    pub fn cache_busted(mut self, token: u128) -> Self {
        self.url
            .query_pairs_mut()
            .append_pair("_", &token.to_string());
        self
    }
}

/// A response received through a [`Fetcher`].
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: Url,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl FetchResponse {
    /// 2xx status.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs network requests on behalf of the page.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a resource. Transport failures are `Err`; HTTP error statuses are not.
    async fn fetch(&self, request: FetchRequest) -> PlatformResult<FetchResponse>;
}
