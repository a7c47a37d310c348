//! Offline cache lifecycle.
//!
//! Coarse control over the application's versioned cache regions. Every
//! operation degrades to `false`/`0`/no-op when Cache Storage is absent.

use std::sync::Arc;

use flashdeck_common::{retry_with_backoff_if, LifecycleConfig, LifecycleError, Result, RetryConfig};
use flashdeck_platform::{CacheEntry, CacheMode, CacheStorage, FetchRequest, Fetcher, Platform};
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::store::{Store, Subscription};

/// Cache manager snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStatus {
    /// Cache Storage is available.
    pub supported: bool,

    /// The offline fallback document was stored by this manager and has not
    /// been evicted through it since.
    pub offline_page_cached: bool,

    /// Result of the last `cache_size()` call.
    pub last_measured_bytes: Option<u64>,
}

/// Manages the application's offline cache regions.
pub struct CacheLifecycleManager {
    caches: Option<Arc<dyn CacheStorage>>,
    network: Arc<dyn Fetcher>,
    config: LifecycleConfig,
    offline_page: Url,
    retry: RetryConfig,
    status: Store<CacheStatus>,
}

impl CacheLifecycleManager {
    pub fn new(platform: &Platform, config: &LifecycleConfig) -> Result<Self> {
        let offline_page = config.resolve(&config.offline_page_url)?;
        let supported = platform.caches.is_some();
        if !supported {
            debug!("Cache Storage unavailable, cache operations are no-ops");
        }

        Ok(Self {
            caches: platform.caches.clone(),
            network: Arc::clone(&platform.network),
            retry: RetryConfig::from(&config.offline_page_retry),
            config: config.clone(),
            offline_page,
            status: Store::new(CacheStatus {
                supported,
                ..CacheStatus::default()
            }),
        })
    }

    /// Whether Cache Storage was present at construction. Every operation is
    /// a no-op otherwise.
    pub fn is_supported(&self) -> bool {
        self.caches.is_some()
    }

    /// Name of the current cache region.
    pub fn cache_name(&self) -> String {
        self.config.cache_name()
    }

    pub fn status(&self) -> CacheStatus {
        self.status.get()
    }

    pub fn on_cache_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CacheStatus) + Send + Sync + 'static,
    {
        self.status.subscribe(callback)
    }

    /// Sum of the body sizes of every entry in the current region.
    ///
    /// Recomputed on every call; the worker can add entries at any time.
    pub async fn cache_size(&self) -> u64 {
        let Some(caches) = &self.caches else {
            return 0;
        };

        let bytes = match self.measure(caches.as_ref()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, category = e.category(), "Failed to measure cache");
                0
            }
        };
        self.status.update(|s| s.last_measured_bytes = Some(bytes));
        bytes
    }

    async fn measure(&self, caches: &dyn CacheStorage) -> Result<u64> {
        let name = self.cache_name();
        if !caches.has(&name).await? {
            return Ok(0);
        }

        let cache = caches.open(&name).await?;
        let mut total = 0;
        for key in cache.keys().await? {
            if let Some(entry) = cache.match_request(&key).await? {
                total += entry.size();
            }
        }
        debug!(cache = %name, bytes = total, "Measured cache");
        Ok(total)
    }

    /// Delete every region belonging to the application. Succeeds when there
    /// is nothing to delete.
    pub async fn clear_cache(&self) -> bool {
        let Some(caches) = &self.caches else {
            return false;
        };

        match self.delete_regions(caches.as_ref(), |_| true).await {
            Ok(deleted) => {
                info!(deleted, "Cleared application caches");
                self.status.update(|s| {
                    s.offline_page_cached = false;
                    s.last_measured_bytes = None;
                });
                true
            }
            Err(e) => {
                warn!(error = %e, category = e.category(), "Failed to clear caches");
                false
            }
        }
    }

    /// Delete application regions other than the current version. Returns
    /// how many were deleted.
    pub async fn prune_stale_caches(&self) -> usize {
        let Some(caches) = &self.caches else {
            return 0;
        };

        let current = self.cache_name();
        match self
            .delete_regions(caches.as_ref(), |name| name != current)
            .await
        {
            Ok(deleted) => {
                if deleted > 0 {
                    info!(deleted, current = %current, "Pruned stale caches");
                }
                deleted
            }
            Err(e) => {
                warn!(error = %e, category = e.category(), "Failed to prune stale caches");
                0
            }
        }
    }

    async fn delete_regions(
        &self,
        caches: &dyn CacheStorage,
        selected: impl Fn(&str) -> bool,
    ) -> Result<usize> {
        let mut deleted = 0;
        for name in caches.keys().await? {
            if self.config.owns_cache(&name) && selected(&name) && caches.delete(&name).await? {
                debug!(cache = %name, "Deleted cache region");
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Delete one entry from the current region. Relative keys resolve against
    /// the base URL. Returns false if the key was absent.
    pub async fn remove_from_cache(&self, key: &str) -> bool {
        let Some(caches) = &self.caches else {
            return false;
        };

        let key = match self.config.resolve(key) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Invalid cache key");
                return false;
            }
        };

        match self.delete_entry(caches.as_ref(), key.as_str()).await {
            Ok(removed) => {
                if removed && key == self.offline_page {
                    self.status.modify(|s| s.offline_page_cached = false);
                }
                removed
            }
            Err(e) => {
                warn!(error = %e, key = %key, "Failed to remove cache entry");
                false
            }
        }
    }

    async fn delete_entry(&self, caches: &dyn CacheStorage, key: &str) -> Result<bool> {
        let name = self.cache_name();
        if !caches.has(&name).await? {
            return Ok(false);
        }
        Ok(caches.open(&name).await?.delete(key).await?)
    }

    /// Fetch the offline fallback document and store it in the current region.
    /// Best effort: failures are logged once retries are exhausted.
    pub async fn cache_offline_page(&self) {
        let Some(caches) = &self.caches else {
            debug!("Cache Storage unavailable, offline page not cached");
            return;
        };

        let stored = retry_with_backoff_if(
            &self.retry,
            || self.store_offline_page(caches.as_ref()),
            LifecycleError::is_retryable,
        )
        .await;
        match stored {
            Ok(bytes) => {
                info!(url = %self.offline_page, bytes, "Offline page cached");
                self.status.modify(|s| s.offline_page_cached = true);
            }
            Err(e) => {
                warn!(url = %self.offline_page, error = %e, "Failed to cache offline page");
            }
        }
    }

    async fn store_offline_page(&self, caches: &dyn CacheStorage) -> Result<u64> {
        let request = FetchRequest::get(self.offline_page.clone()).cache(CacheMode::Reload);
        let response = self.network.fetch(request).await?;
        if !response.ok() {
            return Err(LifecycleError::network(format!(
                "{} answered {}",
                self.offline_page, response.status
            )));
        }

        let entry = CacheEntry::from_response(&response);
        let bytes = entry.size();
        caches
            .open(&self.cache_name())
            .await?
            .put(self.offline_page.as_str(), entry)
            .await?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashdeck_platform::{Cache, HeadlessPlatform, ScriptedResponse};
    use std::time::Duration;

    fn entry(url: &str, body: &[u8]) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            method: "GET".to_string(),
            status: 200,
            headers: Default::default(),
            body: body.to_vec(),
            cached_at: 0,
        }
    }

    const OFFLINE: &str = "http://localhost/offline.html";

    fn manager(platform: &HeadlessPlatform) -> CacheLifecycleManager {
        CacheLifecycleManager::new(&platform.handle(), &LifecycleConfig::default()).unwrap()
    }

    async fn seed(platform: &HeadlessPlatform, region: &str, items: &[(&str, &[u8])]) {
        let cache = platform.caches().unwrap().open_headless(region).await;
        for (key, body) in items {
            cache.put(key, entry(key, body)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_size_of_missing_region_is_zero() {
        let platform = HeadlessPlatform::new();
        let cache = manager(&platform);

        assert_eq!(cache.cache_size().await, 0);
        // Measuring must not create the region.
        assert!(!platform.caches().unwrap().has("flashdeck-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_size_sums_bodies() {
        let platform = HeadlessPlatform::new();
        seed(
            &platform,
            "flashdeck-v1",
            &[("http://localhost/a.js", b"12345"), ("http://localhost/b.css", b"123")],
        )
        .await;
        seed(&platform, "flashdeck-v0", &[("http://localhost/old.js", b"1234567890")]).await;
        let cache = manager(&platform);

        assert_eq!(cache.cache_size().await, 8);
        assert_eq!(cache.status().last_measured_bytes, Some(8));
    }

    #[tokio::test]
    async fn test_size_is_recomputed() {
        let platform = HeadlessPlatform::new();
        let cache = manager(&platform);
        seed(&platform, "flashdeck-v1", &[("http://localhost/a", b"ab")]).await;
        assert_eq!(cache.cache_size().await, 2);

        seed(&platform, "flashdeck-v1", &[("http://localhost/b", b"cde")]).await;
        assert_eq!(cache.cache_size().await, 5);
    }

    #[tokio::test]
    async fn test_clear_deletes_only_application_regions() {
        let platform = HeadlessPlatform::new();
        seed(&platform, "flashdeck-v1", &[("http://localhost/a", b"a")]).await;
        seed(&platform, "flashdeck-v0", &[]).await;
        seed(&platform, "flashdeckish-v1", &[]).await;
        seed(&platform, "other-app", &[]).await;
        let cache = manager(&platform);

        assert!(cache.clear_cache().await);
        assert_eq!(
            platform.caches().unwrap().keys().await.unwrap(),
            vec!["flashdeckish-v1", "other-app"]
        );
        assert!(cache.clear_cache().await);
    }

    #[tokio::test]
    async fn test_clear_reports_failure() {
        let platform = HeadlessPlatform::new();
        seed(&platform, "flashdeck-v1", &[]).await;
        platform.caches().unwrap().set_fail_writes(true);

        assert!(!manager(&platform).clear_cache().await);
    }

    #[tokio::test]
    async fn test_prune_keeps_current_version() {
        let platform = HeadlessPlatform::new();
        seed(&platform, "flashdeck-v1", &[]).await;
        seed(&platform, "flashdeck-v0", &[]).await;
        seed(&platform, "flashdeck-beta", &[]).await;
        let cache = manager(&platform);

        assert_eq!(cache.prune_stale_caches().await, 2);
        assert_eq!(platform.caches().unwrap().keys().await.unwrap(), vec!["flashdeck-v1"]);
        assert_eq!(cache.prune_stale_caches().await, 0);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let platform = HeadlessPlatform::new();
        seed(&platform, "flashdeck-v1", &[("http://localhost/deck/1.json", b"{}")]).await;
        let cache = manager(&platform);

        assert!(cache.remove_from_cache("/deck/1.json").await);
        assert!(!cache.remove_from_cache("/deck/1.json").await);
        assert!(!cache.remove_from_cache("http://localhost/never").await);
    }

    #[tokio::test]
    async fn test_remove_from_missing_region() {
        let platform = HeadlessPlatform::new();
        let cache = manager(&platform);
        assert!(!cache.remove_from_cache("/a").await);
        assert!(!platform.caches().unwrap().has("flashdeck-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_offline_page() {
        let platform = HeadlessPlatform::new();
        platform.network().route(OFFLINE, ScriptedResponse::ok("<h1>Offline</h1>"));
        let cache = manager(&platform);

        cache.cache_offline_page().await;

        let region = platform.caches().unwrap().open_headless("flashdeck-v1").await;
        let stored = region
            .match_request(OFFLINE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.body, b"<h1>Offline</h1>");
        assert!(cache.status().offline_page_cached);
        assert_eq!(platform.network().requests()[0].cache, CacheMode::Reload);

        assert!(cache.remove_from_cache(OFFLINE).await);
        assert!(!cache.status().offline_page_cached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_page_retries_then_gives_up() {
        let platform = HeadlessPlatform::new();
        platform.network().route(OFFLINE, ScriptedResponse::status(503, ""));
        let cache = manager(&platform);

        cache.cache_offline_page().await;

        assert_eq!(platform.network().requests().len(), 3);
        assert!(!cache.status().offline_page_cached);
        assert_eq!(cache.cache_size().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_page_write_failure_is_not_refetched() {
        let platform = HeadlessPlatform::new();
        platform.network().route(
            OFFLINE,
            ScriptedResponse::ok("page").with_latency(Duration::from_millis(5)),
        );
        platform.caches().unwrap().set_fail_writes(true);
        let cache = manager(&platform);

        cache.cache_offline_page().await;
        assert!(!cache.status().offline_page_cached);
        assert_eq!(platform.network().requests().len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_platform_is_noop() {
        let platform = HeadlessPlatform::unsupported();
        platform.network().route(OFFLINE, ScriptedResponse::ok("page"));
        let cache = manager(&platform);

        assert!(!cache.is_supported());
        assert_eq!(cache.cache_size().await, 0);
        assert!(!cache.clear_cache().await);
        assert!(!cache.remove_from_cache("/a").await);
        assert_eq!(cache.prune_stale_caches().await, 0);
        cache.cache_offline_page().await;
        assert!(platform.network().requests().is_empty());
    }
}
