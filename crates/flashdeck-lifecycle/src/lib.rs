//! # Flashdeck Lifecycle
//!
//! Application lifecycle and offline-resilience coordination for the Flashdeck
//! app: installability, connectivity, the offline cache and background updates.
//!
//! ## Features
//!
//! - **Install**: captures the one-shot install invitation and runs the consent flow
//! - **Connectivity**: mirrors online/offline and probes connection quality on demand
//! - **Cache**: size accounting, eviction and offline page pre-warming
//! - **Update**: detects a waiting worker and commits the switch-over
//!
//! ## Architecture
//!
//! ```text
//! LifecycleServices
//!     ├── Capabilities               (service worker + cache storage probe)
//!     ├── InstallabilityCoordinator  Store<InstallState>
//!     ├── ConnectivityMonitor        Store<ConnectivityState>
//!     ├── CacheLifecycleManager      Store<CacheStatus>
//!     └── UpdateCoordinator          Store<UpdateState>
//! ```
//!
//! Managers never call each other. Each one attaches its own platform listeners
//! at construction and publishes read-only snapshots through a [`Store`];
//! subscribing replays the current value immediately.
//!
//! Action methods never fail. Unsupported platforms and transient failures
//! resolve to `false`, `0`, `Offline` or a no-op after logging.

pub mod cache;
pub mod connectivity;
pub mod install;
pub mod services;
pub mod store;
pub mod update;

pub use cache::{CacheLifecycleManager, CacheStatus};
pub use connectivity::{ConnectionQuality, ConnectivityMonitor, ConnectivityState};
pub use install::{InstallState, InstallabilityCoordinator};
pub use services::{global, init_global, Capabilities, LifecycleServices, LifecycleSnapshot};
pub use store::{Store, Subscription, SubscriptionSet};
pub use update::{UpdateCoordinator, UpdateState, UpdateStatus};
