//! Platform event dispatch.
//!
//! Listeners run synchronously inside [`EventTarget::dispatch`], in the order
//! they were added. That ordering matters for `beforeinstallprompt`: the page
//! must call [`InstallPromptEvent::prevent_default`] before dispatch returns,
//! or the platform keeps the invitation for its own UI.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::trace;

use crate::install::InstallPrompt;
use crate::worker::{WorkerId, WorkerState};

/// Kinds of platform events a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BeforeInstallPrompt,
    AppInstalled,
    Online,
    Offline,
    UpdateFound,
    WorkerStateChange,
    ControllerChange,
}

impl EventKind {
    /// DOM event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BeforeInstallPrompt => "beforeinstallprompt",
            EventKind::AppInstalled => "appinstalled",
            EventKind::Online => "online",
            EventKind::Offline => "offline",
            EventKind::UpdateFound => "updatefound",
            EventKind::WorkerStateChange => "statechange",
            EventKind::ControllerChange => "controllerchange",
        }
    }
}

/// An event delivered by the platform.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// The app became installable; carries the one-shot invitation.
    BeforeInstallPrompt(InstallPromptEvent),
    /// The platform finished installing the app.
    AppInstalled,
    /// Connectivity regained.
    Online,
    /// Connectivity lost.
    Offline,
    /// A new worker started installing on the registration.
    UpdateFound,
    /// A worker of the registration changed state.
    WorkerStateChange { worker: WorkerId, state: WorkerState },
    /// A different worker now controls the page.
    ControllerChange,
}

impl PlatformEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PlatformEvent::BeforeInstallPrompt(_) => EventKind::BeforeInstallPrompt,
            PlatformEvent::AppInstalled => EventKind::AppInstalled,
            PlatformEvent::Online => EventKind::Online,
            PlatformEvent::Offline => EventKind::Offline,
            PlatformEvent::UpdateFound => EventKind::UpdateFound,
            PlatformEvent::WorkerStateChange { .. } => EventKind::WorkerStateChange,
            PlatformEvent::ControllerChange => EventKind::ControllerChange,
        }
    }
}

/// The `beforeinstallprompt` event.
#[derive(Clone)]
pub struct InstallPromptEvent {
    prompt: Arc<dyn InstallPrompt>,
    default_prevented: Arc<AtomicBool>,
}

impl InstallPromptEvent {
    pub fn new(prompt: Arc<dyn InstallPrompt>) -> Self {
        Self {
            prompt,
            default_prevented: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Suppress the platform's own install UI and keep the invitation for the page.
    pub fn prevent_default(&self) {
        self.default_prevented.store(true, Ordering::SeqCst);
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.load(Ordering::SeqCst)
    }

    /// The invitation carried by this event.
    pub fn invitation(&self) -> Arc<dyn InstallPrompt> {
        Arc::clone(&self.prompt)
    }
}

impl fmt::Debug for InstallPromptEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallPromptEvent")
            .field("default_prevented", &self.default_prevented())
            .finish_non_exhaustive()
    }
}

/// Identifier returned by [`EventTarget::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// An event listener callback.
pub type EventCallback = Arc<dyn Fn(&PlatformEvent) + Send + Sync>;

struct Listener {
    id: ListenerId,
    kind: EventKind,
    callback: EventCallback,
}

/// Listener registry for platform events.
#[derive(Default)]
pub struct EventTarget {
    next_id: AtomicU64,
    listeners: RwLock<Vec<Listener>>,
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener for one event kind.
    pub fn add_listener<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&PlatformEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Listener {
                id,
                kind,
                callback: Arc::new(callback),
            });
        id
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Check if there are any listeners for an event kind.
    pub fn has_listeners(&self, kind: EventKind) -> bool {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|l| l.kind == kind)
    }

    /// Deliver an event to every matching listener, in registration order.
    /// Returns the number of listeners invoked.
    pub fn dispatch(&self, event: &PlatformEvent) -> usize {
        let kind = event.kind();

        // Listeners may add or remove listeners, so call them outside the lock.
        let callbacks: Vec<EventCallback> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|l| l.kind == kind)
            .map(|l| Arc::clone(&l.callback))
            .collect();

        trace!(event = kind.as_str(), listeners = callbacks.len(), "Dispatching platform event");

        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }
}

impl fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.listeners.read().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("EventTarget").field("listeners", &count).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::ScriptedInstallPrompt;
    use crate::install::UserChoice;
    use std::sync::Mutex;

    #[test]
    fn test_dispatch_in_registration_order() {
        let target = EventTarget::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let log = log.clone();
            target.add_listener(EventKind::Online, move |_| log.lock().unwrap().push(n));
        }

        assert_eq!(target.dispatch(&PlatformEvent::Online), 3);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_dispatch_filters_by_kind() {
        let target = EventTarget::new();
        target.add_listener(EventKind::Online, |_| {});

        assert_eq!(target.dispatch(&PlatformEvent::Offline), 0);
        assert!(target.has_listeners(EventKind::Online));
        assert!(!target.has_listeners(EventKind::Offline));
    }

    #[test]
    fn test_remove_listener() {
        let target = EventTarget::new();
        let id = target.add_listener(EventKind::AppInstalled, |_| {});

        assert!(target.remove_listener(id));
        assert!(!target.remove_listener(id));
        assert_eq!(target.dispatch(&PlatformEvent::AppInstalled), 0);
    }

    #[test]
    fn test_listener_can_add_listener_during_dispatch() {
        let target = Arc::new(EventTarget::new());
        let inner = Arc::clone(&target);

        target.add_listener(EventKind::Online, move |_| {
            inner.add_listener(EventKind::Offline, |_| {});
        });

        target.dispatch(&PlatformEvent::Online);
        assert!(target.has_listeners(EventKind::Offline));
    }

    #[test]
    fn test_prevent_default_is_shared_across_clones() {
        let prompt = Arc::new(ScriptedInstallPrompt::new(UserChoice::Accepted));
        let event = InstallPromptEvent::new(prompt);
        let clone = event.clone();

        assert!(!event.default_prevented());
        clone.prevent_default();
        assert!(event.default_prevented());
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::BeforeInstallPrompt.as_str(), "beforeinstallprompt");
        assert_eq!(
            PlatformEvent::WorkerStateChange {
                worker: WorkerId::new(),
                state: WorkerState::Installed,
            }
            .kind(),
            EventKind::WorkerStateChange
        );
    }
}
