//! In-memory Cache Storage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;

use crate::cache::{Cache, CacheEntry, CacheStorage};
use crate::{PlatformError, PlatformResult};

/// A cache instance.
#[derive(Debug)]
pub struct HeadlessCache {
    /// Cache name.
    name: String,

    /// Cached entries.
    entries: RwLock<HashMap<String, CacheEntry>>,

    /// Shared write-failure switch of the owning storage.
    fail_writes: Arc<AtomicBool>,
}

impl HeadlessCache {
    fn new(name: &str, fail_writes: Arc<AtomicBool>) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
            fail_writes,
        }
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_writable(&self) -> PlatformResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PlatformError::Cache(format!("quota exceeded in {}", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl Cache for HeadlessCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn keys(&self) -> PlatformResult<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }

    async fn match_request(&self, key: &str) -> PlatformResult<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> PlatformResult<()> {
        self.check_writable()?;
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> PlatformResult<bool> {
        self.check_writable()?;
        Ok(self.entries.write().await.remove(key).is_some())
    }
}

/// Cache storage (caches global).
#[derive(Debug, Default)]
pub struct HeadlessCacheStorage {
    caches: RwLock<HashMap<String, Arc<HeadlessCache>>>,
    fail_writes: Arc<AtomicBool>,
}

impl HeadlessCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write or delete fail, as a full quota would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Open a region and return the concrete type, for test setup.
    pub async fn open_headless(&self, name: &str) -> Arc<HeadlessCache> {
        let mut caches = self.caches.write().await;
        Arc::clone(
            caches
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(HeadlessCache::new(name, Arc::clone(&self.fail_writes)))),
        )
    }
}

#[async_trait]
impl CacheStorage for HeadlessCacheStorage {
    async fn has(&self, name: &str) -> PlatformResult<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn open(&self, name: &str) -> PlatformResult<Arc<dyn Cache>> {
        Ok(self.open_headless(name).await)
    }

    async fn delete(&self, name: &str) -> PlatformResult<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PlatformError::Cache(format!("cannot delete {name}")));
        }
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn keys(&self) -> PlatformResult<Vec<String>> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
