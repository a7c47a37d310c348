//! Cache Storage seam.

use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::fetch::FetchResponse;
use crate::PlatformResult;

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Build an entry from a network response.
    pub fn from_response(response: &FetchResponse) -> Self {
        Self {
            url: response.url.to_string(),
            method: "GET".to_string(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.to_vec(),
            cached_at: now_ms(),
        }
    }

    /// Body size in bytes.
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// One named cache region (`caches.open(name)`).
#[async_trait]
pub trait Cache: Send + Sync {
    /// Region name.
    fn name(&self) -> &str;

    /// All stored request keys.
    async fn keys(&self) -> PlatformResult<Vec<String>>;

    /// Look up a stored response by request key.
    async fn match_request(&self, key: &str) -> PlatformResult<Option<CacheEntry>>;

    /// Store a response under a request key, replacing any previous one.
    async fn put(&self, key: &str, entry: CacheEntry) -> PlatformResult<()>;

    /// Delete one entry. Returns false if the key was absent.
    async fn delete(&self, key: &str) -> PlatformResult<bool>;
}

/// The origin's cache regions (`caches`).
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Check if a region exists without creating it.
    async fn has(&self, name: &str) -> PlatformResult<bool>;

    /// Open a region, creating it if it doesn't exist.
    async fn open(&self, name: &str) -> PlatformResult<Arc<dyn Cache>>;

    /// Delete a region. Returns false if it didn't exist.
    async fn delete(&self, name: &str) -> PlatformResult<bool>;

    /// Names of all regions.
    async fn keys(&self) -> PlatformResult<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use url::Url;

    #[test]
    fn test_entry_from_response() {
        let response = FetchResponse {
            url: Url::parse("https://example.com/offline.html").unwrap(),
            status: 200,
            headers: HashMap::new(),
            body: Bytes::from_static(b"<h1>offline</h1>"),
        };

        let entry = CacheEntry::from_response(&response);
        assert_eq!(entry.url, "https://example.com/offline.html");
        assert_eq!(entry.method, "GET");
        assert_eq!(entry.size(), 16);
        assert!(entry.cached_at > 0);
    }
}
