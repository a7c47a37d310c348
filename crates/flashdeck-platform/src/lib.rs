//! # Flashdeck Platform
//!
//! The browser primitives the lifecycle coordinator observes and controls,
//! expressed as traits so the coordinator can run against a real host or the
//! in-memory [`HeadlessPlatform`].
//!
//! ## Architecture
//!
//! ```text
//! Platform (cloneable handle)
//!     ├── events          EventTarget (synchronous dispatch)
//!     ├── navigator       onLine / display-mode: standalone
//!     ├── network         fetch()
//!     ├── location        reload()
//!     ├── caches?         CacheStorage
//!     │       └── Cache   request key → CacheEntry
//!     └── service_worker? ServiceWorkerContainer
//!             └── WorkerRegistration
//!                     ├── installing
//!                     ├── waiting
//!                     └── active
//! ```
//!
//! `caches` and `service_worker` are optional: a host without the primitive
//! leaves them `None`.

use std::sync::Arc;
use std::time::Duration;

use flashdeck_common::LifecycleError;
use thiserror::Error;

pub mod cache;
pub mod events;
pub mod fetch;
pub mod headless;
pub mod http_fetcher;
pub mod install;
pub mod navigator;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheStorage};
pub use events::{EventKind, EventTarget, InstallPromptEvent, ListenerId, PlatformEvent};
pub use fetch::{CacheMode, FetchRequest, FetchResponse, Fetcher};
pub use headless::{HeadlessPlatform, ScriptedInstallPrompt, ScriptedResponse};
pub use http_fetcher::HttpFetcher;
pub use install::{InstallPrompt, UserChoice};
pub use navigator::{Location, Navigator};
pub use worker::{
    ServiceWorkerContainer, WorkerId, WorkerInfo, WorkerMessage, WorkerRegistration, WorkerState,
};

// ==================== Errors ====================

/// Errors reported by platform primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl From<PlatformError> for LifecycleError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::NotSupported(what) => LifecycleError::Unsupported(what),
            PlatformError::Network(message) => LifecycleError::network(message),
            PlatformError::Cache(message) => LifecycleError::cache(message),
            PlatformError::Timeout(after) => LifecycleError::Timeout(after),
            PlatformError::InvalidState(message) | PlatformError::NotFound(message) => {
                LifecycleError::worker(message)
            }
        }
    }
}

/// Result type alias for platform operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

// ==================== Platform Handle ====================

/// Everything the coordinator needs from its host.
#[derive(Clone)]
pub struct Platform {
    /// Platform event dispatch.
    pub events: Arc<EventTarget>,

    /// Connectivity and display-mode queries.
    pub navigator: Arc<dyn Navigator>,

    /// Network access for the quality probe and offline pre-warm.
    pub network: Arc<dyn Fetcher>,

    /// Page reload.
    pub location: Arc<dyn Location>,

    /// Cache Storage, when the host has it.
    pub caches: Option<Arc<dyn CacheStorage>>,

    /// Service worker container, when the host has it.
    pub service_worker: Option<Arc<dyn ServiceWorkerContainer>>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("caches", &self.caches.is_some())
            .field("service_worker", &self.service_worker.is_some())
            .finish_non_exhaustive()
    }
}
