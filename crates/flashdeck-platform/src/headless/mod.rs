//! In-memory platform.
//!
//! Implements every platform seam without a browser. Hosts that have no real
//! Cache Storage or service workers run on it, and the coordinator's tests use
//! its knobs to drive platform events deterministically.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::events::{EventTarget, InstallPromptEvent, PlatformEvent};
use crate::navigator::{Location, Navigator};
use crate::Platform;

mod cache;
mod network;
mod prompt;
mod worker;

pub use cache::{HeadlessCache, HeadlessCacheStorage};
pub use network::{HeadlessNetwork, ScriptedResponse};
pub use prompt::ScriptedInstallPrompt;
pub use worker::{HeadlessRegistration, HeadlessWorkerContainer, ServiceWorker};

// ==================== Navigator ====================

/// Navigator with togglable connectivity and display mode.
#[derive(Debug)]
pub struct HeadlessNavigator {
    online: AtomicBool,
    standalone: AtomicBool,
}

impl HeadlessNavigator {
    fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            standalone: AtomicBool::new(false),
        }
    }
}

impl Navigator for HeadlessNavigator {
    fn on_line(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn display_mode_standalone(&self) -> bool {
        self.standalone.load(Ordering::SeqCst)
    }
}

// ==================== Location ====================

/// Location that counts reloads instead of performing them.
#[derive(Debug, Default)]
pub struct HeadlessLocation {
    reloads: AtomicU32,
}

impl HeadlessLocation {
    /// Number of reloads requested so far.
    pub fn reload_count(&self) -> u32 {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl Location for HeadlessLocation {
    fn reload(&self) {
        let count = self.reloads.fetch_add(1, Ordering::SeqCst) + 1;
        info!(count, "Page reload requested");
    }
}

// ==================== Platform ====================

/// An in-memory platform.
pub struct HeadlessPlatform {
    events: Arc<EventTarget>,
    navigator: Arc<HeadlessNavigator>,
    network: Arc<HeadlessNetwork>,
    location: Arc<HeadlessLocation>,
    caches: Option<Arc<HeadlessCacheStorage>>,
    workers: Option<Arc<HeadlessWorkerContainer>>,
}

impl HeadlessPlatform {
    /// A platform with every primitive present, online, not standalone.
    pub fn new() -> Self {
        let events = Arc::new(EventTarget::new());
        let navigator = Arc::new(HeadlessNavigator::new());
        Self {
            network: Arc::new(HeadlessNetwork::new(Arc::clone(&navigator))),
            caches: Some(Arc::new(HeadlessCacheStorage::new())),
            workers: Some(Arc::new(HeadlessWorkerContainer::new(Arc::clone(&events)))),
            location: Arc::new(HeadlessLocation::default()),
            events,
            navigator,
        }
    }

    /// A platform without Cache Storage or service workers.
    pub fn unsupported() -> Self {
        Self {
            caches: None,
            workers: None,
            ..Self::new()
        }
    }

    /// Set the startup connectivity without firing an event.
    pub fn with_online(self, online: bool) -> Self {
        self.navigator.online.store(online, Ordering::SeqCst);
        self
    }

    /// Set the startup display mode.
    pub fn with_standalone(self, standalone: bool) -> Self {
        self.navigator.standalone.store(standalone, Ordering::SeqCst);
        self
    }

    /// The handle managers are constructed from.
    pub fn handle(&self) -> Platform {
        Platform {
            events: Arc::clone(&self.events),
            navigator: self.navigator.clone(),
            network: self.network.clone(),
            location: self.location.clone(),
            caches: self.caches.clone().map(|c| c as Arc<dyn crate::CacheStorage>),
            service_worker: self
                .workers
                .clone()
                .map(|w| w as Arc<dyn crate::ServiceWorkerContainer>),
        }
    }

    pub fn events(&self) -> &Arc<EventTarget> {
        &self.events
    }

    pub fn network(&self) -> &Arc<HeadlessNetwork> {
        &self.network
    }

    pub fn location(&self) -> &Arc<HeadlessLocation> {
        &self.location
    }

    pub fn caches(&self) -> Option<&Arc<HeadlessCacheStorage>> {
        self.caches.as_ref()
    }

    pub fn workers(&self) -> Option<&Arc<HeadlessWorkerContainer>> {
        self.workers.as_ref()
    }

    /// Change connectivity and fire `online`/`offline`. Fires on every call,
    /// even when the value is unchanged.
    pub fn set_online(&self, online: bool) {
        self.navigator.online.store(online, Ordering::SeqCst);
        debug!(online, "Connectivity changed");
        let event = if online {
            PlatformEvent::Online
        } else {
            PlatformEvent::Offline
        };
        self.events.dispatch(&event);
    }

    /// Fire `beforeinstallprompt` with the given invitation. Returns whether
    /// the page suppressed the default UI during dispatch; if it didn't, the
    /// invitation is discarded.
    pub fn fire_installable(&self, prompt: Arc<ScriptedInstallPrompt>) -> bool {
        let event = InstallPromptEvent::new(prompt.clone());
        self.events
            .dispatch(&PlatformEvent::BeforeInstallPrompt(event.clone()));

        let prevented = event.default_prevented();
        if !prevented {
            debug!("beforeinstallprompt not suppressed, invitation discarded");
            prompt.discard();
        }
        prevented
    }

    /// Fire `appinstalled`.
    pub fn fire_app_installed(&self) {
        self.events.dispatch(&PlatformEvent::AppInstalled);
    }
}

impl Default for HeadlessPlatform {
    fn default() -> Self {
        Self::new()
    }
}
