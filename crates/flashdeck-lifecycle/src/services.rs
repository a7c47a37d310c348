//! The lifecycle services bundle.
//!
//! One constructed instance per page, passed to the UI layer. Hosts that
//! prefer a process-wide handle can install it with [`init_global`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use flashdeck_common::{LifecycleConfig, LifecycleError, OptionExt, Result};
use flashdeck_platform::Platform;
use serde::Serialize;
use tracing::info;

use crate::cache::{CacheLifecycleManager, CacheStatus};
use crate::connectivity::{ConnectionQuality, ConnectivityMonitor, ConnectivityState};
use crate::install::{InstallState, InstallabilityCoordinator};
use crate::store::SubscriptionSet;
use crate::update::{UpdateCoordinator, UpdateState, UpdateStatus};

/// Platform primitives detected once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub service_worker: bool,
    pub cache_storage: bool,
}

impl Capabilities {
    pub fn detect(platform: &Platform) -> Self {
        Self {
            service_worker: platform.service_worker.is_some(),
            cache_storage: platform.caches.is_some(),
        }
    }

    /// Both primitives the offline feature set needs are present.
    pub fn is_supported(&self) -> bool {
        self.service_worker && self.cache_storage
    }
}

/// Aggregate view over all four managers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleSnapshot {
    pub is_supported: bool,
    pub install_state: InstallState,
    pub is_installable: bool,
    pub is_installed: bool,
    pub is_online: bool,
    pub quality: ConnectionQuality,
    pub update_status: UpdateStatus,
    pub has_update: bool,
    pub offline_page_cached: bool,
}

impl LifecycleSnapshot {
    fn apply_install(&mut self, state: &InstallState) {
        self.install_state = *state;
        self.is_installable = state.is_installable();
        self.is_installed = state.is_installed();
    }

    fn apply_connectivity(&mut self, state: &ConnectivityState) {
        self.is_online = state.online;
        self.quality = state.quality;
    }

    fn apply_update(&mut self, state: &UpdateState) {
        self.update_status = state.status;
        self.has_update = state.has_update;
    }

    fn apply_cache(&mut self, status: &CacheStatus) {
        self.offline_page_cached = status.offline_page_cached;
    }
}

/// The four lifecycle managers plus the capability probe.
pub struct LifecycleServices {
    capabilities: Capabilities,
    install: InstallabilityCoordinator,
    connectivity: ConnectivityMonitor,
    cache: CacheLifecycleManager,
    update: UpdateCoordinator,
}

impl LifecycleServices {
    /// Validate the configuration and construct every manager.
    pub fn new(platform: Platform, config: LifecycleConfig) -> Result<Self> {
        config.validate()?;

        let capabilities = Capabilities::detect(&platform);
        let services = Self {
            install: InstallabilityCoordinator::new(&platform),
            connectivity: ConnectivityMonitor::new(&platform, &config)?,
            cache: CacheLifecycleManager::new(&platform, &config)?,
            update: UpdateCoordinator::new(&platform, &config),
            capabilities,
        };

        info!(
            service_worker = capabilities.service_worker,
            cache_storage = capabilities.cache_storage,
            "Lifecycle services initialized"
        );
        Ok(services)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Whether the platform can run the offline feature set at all.
    pub fn is_supported(&self) -> bool {
        self.capabilities.is_supported()
    }

    pub fn install(&self) -> &InstallabilityCoordinator {
        &self.install
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn cache(&self) -> &CacheLifecycleManager {
        &self.cache
    }

    pub fn update(&self) -> &UpdateCoordinator {
        &self.update
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        let mut snapshot = LifecycleSnapshot {
            is_supported: self.is_supported(),
            install_state: InstallState::Idle,
            is_installable: false,
            is_installed: false,
            is_online: false,
            quality: ConnectionQuality::Offline,
            update_status: UpdateStatus::Unsupported,
            has_update: false,
            offline_page_cached: false,
        };
        snapshot.apply_install(&self.install.state());
        snapshot.apply_connectivity(&self.connectivity.state());
        snapshot.apply_update(&self.update.state());
        snapshot.apply_cache(&self.cache.status());
        snapshot
    }

    /// Subscribe to the aggregate. The callback runs once immediately, then
    /// after every transition of any manager.
    pub fn watch<F>(&self, callback: F) -> SubscriptionSet
    where
        F: Fn(&LifecycleSnapshot) + Send + Sync + 'static,
    {
        let relay = Relay {
            current: Arc::new(Mutex::new(self.snapshot())),
            callback: Arc::new(callback),
            ready: Arc::new(AtomicBool::new(false)),
        };

        let mut subscriptions = SubscriptionSet::new();
        subscriptions.push(
            self.install
                .on_installable_change(relay.forward(LifecycleSnapshot::apply_install)),
        );
        subscriptions.push(
            self.connectivity
                .on_network_change(relay.forward(LifecycleSnapshot::apply_connectivity)),
        );
        subscriptions.push(
            self.update
                .on_update_change(relay.forward(LifecycleSnapshot::apply_update)),
        );
        subscriptions.push(
            self.cache
                .on_cache_change(relay.forward(LifecycleSnapshot::apply_cache)),
        );

        relay.ready.store(true, Ordering::SeqCst);
        let initial = relay.snapshot();
        (relay.callback)(&initial);
        subscriptions
    }
}

impl std::fmt::Debug for LifecycleServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleServices")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Folds per-manager notifications into one snapshot for a `watch` callback.
struct Relay<F> {
    current: Arc<Mutex<LifecycleSnapshot>>,
    callback: Arc<F>,
    ready: Arc<AtomicBool>,
}

impl<F> Relay<F>
where
    F: Fn(&LifecycleSnapshot) + Send + Sync + 'static,
{
    fn forward<S>(
        &self,
        apply: fn(&mut LifecycleSnapshot, &S),
    ) -> impl Fn(&S) + Send + Sync + 'static
    where
        S: 'static,
    {
        let current = Arc::clone(&self.current);
        let callback = Arc::clone(&self.callback);
        let ready = Arc::clone(&self.ready);
        move |state: &S| {
            let snapshot = {
                let mut current = current.lock().unwrap_or_else(PoisonError::into_inner);
                apply(&mut current, state);
                current.clone()
            };
            // Subscription replays during setup are folded into the initial call.
            if ready.load(Ordering::SeqCst) {
                callback(&snapshot);
            }
        }
    }

    fn snapshot(&self) -> LifecycleSnapshot {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ==================== Global ====================

static GLOBAL: OnceLock<Arc<LifecycleServices>> = OnceLock::new();

/// Install the process-wide bundle. Fails if one is already installed.
pub fn init_global(services: LifecycleServices) -> Result<Arc<LifecycleServices>> {
    let services = Arc::new(services);
    GLOBAL
        .set(Arc::clone(&services))
        .map_err(|_| LifecycleError::AlreadyInitialized("lifecycle services"))?;
    Ok(services)
}

/// The process-wide bundle. Calling this before [`init_global`] is a
/// programming error reported as `NotInitialized`.
pub fn global() -> Result<Arc<LifecycleServices>> {
    GLOBAL
        .get()
        .cloned()
        .ok_or_not_initialized("lifecycle services")
}
