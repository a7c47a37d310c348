//! In-memory service worker registration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use crate::events::{EventTarget, PlatformEvent};
use crate::worker::{
    ServiceWorkerContainer, WorkerId, WorkerInfo, WorkerMessage, WorkerRegistration, WorkerState,
};
use crate::{PlatformError, PlatformResult};

// ==================== Service Worker ====================

/// A service worker instance.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: WorkerId,

    /// Script URL.
    pub script_url: Url,

    /// Current state.
    pub state: WorkerState,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    fn new(script_url: Url) -> Self {
        Self {
            id: WorkerId::new(),
            script_url,
            state: WorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state and record the matching `statechange` event.
    fn set_state(&mut self, state: WorkerState, events: &mut Vec<PlatformEvent>) {
        self.state = state;
        self.state_changed_at = Instant::now();
        events.push(PlatformEvent::WorkerStateChange {
            worker: self.id,
            state,
        });
    }

    fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id,
            state: self.state,
        }
    }
}

// ==================== Registration ====================

#[derive(Debug, Default)]
struct Slots {
    installing: Option<ServiceWorker>,
    waiting: Option<ServiceWorker>,
    active: Option<ServiceWorker>,
    controller: Option<WorkerId>,
}

/// A service worker registration with scripted update behaviour.
///
/// Events are collected while the slots are locked and dispatched after the
/// lock is released, so listeners can query the registration.
#[derive(Debug)]
pub struct HeadlessRegistration {
    scope: Url,
    script_url: Url,
    events: Arc<EventTarget>,
    slots: Mutex<Slots>,
    remote_update: AtomicBool,
    fail_updates: AtomicBool,
    unresponsive: AtomicBool,
    messages: Mutex<Vec<WorkerMessage>>,
}

impl HeadlessRegistration {
    fn new(scope: Url, script_url: Url, events: Arc<EventTarget>) -> Self {
        Self {
            scope,
            script_url,
            events,
            slots: Mutex::new(Slots::default()),
            remote_update: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            unresponsive: AtomicBool::new(false),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    /// Make the next `update()` find a newer script.
    pub fn queue_remote_update(&self) {
        self.remote_update.store(true, Ordering::SeqCst);
    }

    /// Make `update()` fail with a network error.
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Make the waiting worker never acknowledge messages.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.unresponsive.store(unresponsive, Ordering::SeqCst);
    }

    /// Messages delivered to waiting workers so far.
    pub fn messages(&self) -> Vec<WorkerMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start installing a new worker, replacing any worker already installing.
    pub fn begin_install(&self) -> WorkerId {
        let mut events = Vec::new();
        let id = {
            let mut slots = self.lock_slots();
            if let Some(mut previous) = slots.installing.take() {
                previous.set_state(WorkerState::Redundant, &mut events);
            }
            let mut worker = ServiceWorker::new(self.script_url.clone());
            let id = worker.id;
            events.push(PlatformEvent::UpdateFound);
            worker.set_state(WorkerState::Installing, &mut events);
            slots.installing = Some(worker);
            id
        };
        debug!(worker = id.raw(), "Worker installing");
        self.dispatch_all(events);
        id
    }

    /// Finish installing the installing worker. It waits if another worker is
    /// active; on a first install it activates and claims the page at once.
    pub fn finish_install(&self) -> Option<WorkerId> {
        let mut events = Vec::new();
        let id = {
            let mut slots = self.lock_slots();
            let mut worker = slots.installing.take()?;
            worker.set_state(WorkerState::Installed, &mut events);
            if let Some(mut superseded) = slots.waiting.take() {
                superseded.set_state(WorkerState::Redundant, &mut events);
            }
            let id = worker.id;
            slots.waiting = Some(worker);
            if slots.active.is_none() {
                Self::activate(&mut slots, &mut events);
            }
            id
        };
        debug!(worker = id.raw(), "Worker installed");
        self.dispatch_all(events);
        Some(id)
    }

    /// Fail the installing worker.
    pub fn fail_install(&self) -> Option<WorkerId> {
        let mut events = Vec::new();
        let id = {
            let mut slots = self.lock_slots();
            let mut worker = slots.installing.take()?;
            worker.set_state(WorkerState::Redundant, &mut events);
            worker.id
        };
        self.dispatch_all(events);
        Some(id)
    }

    /// Activate waiting worker.
    fn activate(slots: &mut Slots, events: &mut Vec<PlatformEvent>) {
        if let Some(mut worker) = slots.waiting.take() {
            worker.set_state(WorkerState::Activating, events);

            // Mark old active as redundant
            if let Some(mut old) = slots.active.take() {
                old.set_state(WorkerState::Redundant, events);
            }

            worker.set_state(WorkerState::Activated, events);
            slots.controller = Some(worker.id);
            slots.active = Some(worker);
            events.push(PlatformEvent::ControllerChange);
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch_all(&self, events: Vec<PlatformEvent>) {
        for event in &events {
            self.events.dispatch(event);
        }
    }

    fn controller(&self) -> Option<WorkerInfo> {
        let slots = self.lock_slots();
        let id = slots.controller?;
        slots.active.as_ref().filter(|w| w.id == id).map(ServiceWorker::info)
    }
}

#[async_trait]
impl WorkerRegistration for HeadlessRegistration {
    fn installing(&self) -> Option<WorkerInfo> {
        self.lock_slots().installing.as_ref().map(ServiceWorker::info)
    }

    fn waiting(&self) -> Option<WorkerInfo> {
        self.lock_slots().waiting.as_ref().map(ServiceWorker::info)
    }

    fn active(&self) -> Option<WorkerInfo> {
        self.lock_slots().active.as_ref().map(ServiceWorker::info)
    }

    async fn update(&self) -> PlatformResult<bool> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(PlatformError::Network(format!(
                "failed to fetch {}",
                self.script_url
            )));
        }
        if !self.remote_update.swap(false, Ordering::SeqCst) {
            debug!(scope = %self.scope, "No newer worker script");
            return Ok(false);
        }
        self.begin_install();
        Ok(true)
    }

    async fn post_message(&self, message: WorkerMessage) -> PlatformResult<()> {
        if self.waiting().is_none() {
            return Err(PlatformError::InvalidState(
                "no waiting worker to receive the message".to_string(),
            ));
        }
        if self.unresponsive.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);

        match message {
            WorkerMessage::SkipWaiting => {
                let mut events = Vec::new();
                Self::activate(&mut self.lock_slots(), &mut events);
                info!(scope = %self.scope, "Waiting worker skipped waiting");
                self.dispatch_all(events);
            }
        }
        Ok(())
    }
}

// ==================== Container ====================

/// Service worker container (navigator.serviceWorker) with one registration.
#[derive(Debug)]
pub struct HeadlessWorkerContainer {
    events: Arc<EventTarget>,
    registration: RwLock<Option<Arc<HeadlessRegistration>>>,
}

impl HeadlessWorkerContainer {
    pub fn new(events: Arc<EventTarget>) -> Self {
        Self {
            events,
            registration: RwLock::new(None),
        }
    }

    /// Register a worker on a page that has never had one. The worker starts
    /// installing; `finish_install` activates it.
    pub fn register(&self, script_url: Url) -> Arc<HeadlessRegistration> {
        let registration = self.create_registration(script_url);
        registration.begin_install();
        registration
    }

    /// Register a worker that is already active and controlling the page, as
    /// on a return visit.
    pub fn register_active(&self, script_url: Url) -> Arc<HeadlessRegistration> {
        let registration = self.create_registration(script_url);
        {
            let mut slots = registration.lock_slots();
            let mut worker = ServiceWorker::new(registration.script_url.clone());
            worker.state = WorkerState::Activated;
            slots.controller = Some(worker.id);
            slots.active = Some(worker);
        }
        registration
    }

    /// The registration, for driving it in tests.
    pub fn headless_registration(&self) -> Option<Arc<HeadlessRegistration>> {
        self.registration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn create_registration(&self, script_url: Url) -> Arc<HeadlessRegistration> {
        let mut scope = script_url.clone();
        let dir = script_url
            .path()
            .rsplit_once('/')
            .map(|(p, _)| format!("{p}/"))
            .unwrap_or_else(|| "/".to_string());
        scope.set_path(&dir);

        let registration = Arc::new(HeadlessRegistration::new(
            scope,
            script_url,
            Arc::clone(&self.events),
        ));
        *self
            .registration
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&registration));
        registration
    }
}

impl ServiceWorkerContainer for HeadlessWorkerContainer {
    fn registration(&self) -> Option<Arc<dyn WorkerRegistration>> {
        self.headless_registration()
            .map(|r| r as Arc<dyn WorkerRegistration>)
    }

    fn controller(&self) -> Option<WorkerInfo> {
        self.headless_registration()?.controller()
    }
}
