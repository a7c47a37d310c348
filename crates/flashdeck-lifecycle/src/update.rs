//! Background update coordination.
//!
//! The worker lifecycle is observed, not owned. Status follows the newest
//! worker; `has_update` is derived from the registration itself and is only
//! true while a worker waits behind a controlling one.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use flashdeck_common::{with_timeout, LifecycleConfig};
use flashdeck_platform::{
    EventKind, EventTarget, ListenerId, Location, Platform, PlatformEvent, ServiceWorkerContainer,
    WorkerId, WorkerMessage, WorkerRegistration, WorkerState,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::store::{Store, Subscription};

/// Lifecycle status of the newest worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Unsupported,
    Installing,
    Waiting,
    Active,
    Redundant,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Unsupported => "unsupported",
            UpdateStatus::Installing => "installing",
            UpdateStatus::Waiting => "waiting",
            UpdateStatus::Active => "active",
            UpdateStatus::Redundant => "redundant",
        }
    }
}

impl From<WorkerState> for UpdateStatus {
    fn from(state: WorkerState) -> Self {
        match state {
            WorkerState::Parsed | WorkerState::Installing => UpdateStatus::Installing,
            WorkerState::Installed => UpdateStatus::Waiting,
            WorkerState::Activating | WorkerState::Activated => UpdateStatus::Active,
            WorkerState::Redundant => UpdateStatus::Redundant,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpdateState {
    pub status: UpdateStatus,

    /// A newer version is installed and waiting to take over.
    pub has_update: bool,
}

struct Shared {
    state: Store<UpdateState>,
    container: Option<Arc<dyn ServiceWorkerContainer>>,
    tracked: Mutex<Option<WorkerId>>,
}

impl Shared {
    fn registration(&self) -> Option<Arc<dyn WorkerRegistration>> {
        self.container.as_ref()?.registration()
    }

    fn track(&self, worker: Option<WorkerId>) {
        *self.tracked.lock().unwrap_or_else(PoisonError::into_inner) = worker;
    }

    fn tracked(&self) -> Option<WorkerId> {
        *self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn has_update(&self) -> bool {
        let Some(container) = &self.container else {
            return false;
        };
        let waiting = container
            .registration()
            .is_some_and(|reg| reg.waiting().is_some());
        waiting && container.controller().is_some()
    }

    /// Derive the whole state from the registration. Catches a worker that
    /// reached `waiting` before any listener was attached.
    fn observe(&self) {
        let status = if self.container.is_none() {
            UpdateStatus::Unsupported
        } else if let Some(reg) = self.registration() {
            if let Some(worker) = reg.installing() {
                self.track(Some(worker.id));
                UpdateStatus::Installing
            } else if let Some(worker) = reg.waiting() {
                self.track(Some(worker.id));
                UpdateStatus::Waiting
            } else if let Some(worker) = reg.active() {
                self.track(Some(worker.id));
                UpdateStatus::Active
            } else {
                UpdateStatus::Installing
            }
        } else {
            UpdateStatus::Installing
        };

        let has_update = self.has_update();
        self.state.modify(|s| {
            s.status = status;
            s.has_update = has_update;
        });
    }

    fn on_event(&self, event: &PlatformEvent) {
        match event {
            PlatformEvent::UpdateFound => {
                let installing = self.registration().and_then(|reg| reg.installing());
                if let Some(worker) = &installing {
                    debug!(worker = worker.id.raw(), "Update found");
                }
                self.track(installing.map(|w| w.id));
                self.publish(UpdateStatus::Installing);
            }
            PlatformEvent::WorkerStateChange { worker, state } => {
                let tracked = self.tracked();
                if tracked.is_none() || tracked == Some(*worker) {
                    self.publish(UpdateStatus::from(*state));
                } else {
                    // A superseded worker; only has_update can move.
                    let has_update = self.has_update();
                    self.state.modify(|s| s.has_update = has_update);
                }
            }
            PlatformEvent::ControllerChange => {
                debug!("Controller changed");
                self.observe();
            }
            _ => {}
        }
    }

    fn publish(&self, status: UpdateStatus) {
        let has_update = self.has_update();
        let changed = self.state.modify(|s| {
            s.status = status;
            s.has_update = has_update;
        });
        if changed && has_update {
            info!("Update waiting to be applied");
        }
    }
}

/// Detects a waiting update and commits the switch-over on request.
pub struct UpdateCoordinator {
    shared: Arc<Shared>,
    location: Arc<dyn Location>,
    handoff_timeout: Duration,
    /// Last worker whose hand-off reloaded the page.
    reloaded_for: Mutex<Option<WorkerId>>,
    events: Arc<EventTarget>,
    listeners: Vec<ListenerId>,
}

impl UpdateCoordinator {
    pub fn new(platform: &Platform, config: &LifecycleConfig) -> Self {
        let shared = Arc::new(Shared {
            state: Store::new(UpdateState {
                status: UpdateStatus::Unsupported,
                has_update: false,
            }),
            container: platform.service_worker.clone(),
            tracked: Mutex::new(None),
        });

        let mut listeners = Vec::new();
        if shared.container.is_some() {
            for kind in [
                EventKind::UpdateFound,
                EventKind::WorkerStateChange,
                EventKind::ControllerChange,
            ] {
                let shared = Arc::clone(&shared);
                listeners.push(
                    platform
                        .events
                        .add_listener(kind, move |event| shared.on_event(event)),
                );
            }
        }

        shared.observe();
        debug!(
            status = shared.state.get().status.as_str(),
            "UpdateCoordinator initialized"
        );

        Self {
            shared,
            location: Arc::clone(&platform.location),
            handoff_timeout: config.handoff_timeout(),
            reloaded_for: Mutex::new(None),
            events: Arc::clone(&platform.events),
            listeners,
        }
    }

    /// Status of the newest worker and whether an update is waiting.
    pub fn state(&self) -> UpdateState {
        self.shared.state.get()
    }

    /// A newer version is waiting and a controller is in charge.
    pub fn has_update(&self) -> bool {
        self.state().has_update
    }

    pub fn on_update_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&UpdateState) + Send + Sync + 'static,
    {
        self.shared.state.subscribe(callback)
    }

    /// Ask the worker to check for a newer script. Returns whether one was
    /// found; `has_update` only follows once it finishes installing.
    pub async fn check_for_app_updates(&self) -> bool {
        let Some(registration) = self.shared.registration() else {
            debug!("No worker registration, skipping update check");
            return false;
        };

        let found = match registration.update().await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Update check failed");
                false
            }
        };
        self.shared.observe();
        info!(found, "Checked for updates");
        found
    }

    /// Tell the waiting worker to take over, then reload the page once per
    /// handed-off version.
    /// Resolves false when nothing is waiting, when delivery fails, or when
    /// the worker does not acknowledge within the hand-off timeout.
    pub async fn update_app(&self) -> bool {
        let Some(registration) = self.shared.registration() else {
            return false;
        };
        let Some(waiting) = registration.waiting() else {
            debug!("No waiting worker, nothing to apply");
            return false;
        };

        let delivered = with_timeout(
            self.handoff_timeout,
            registration.post_message(WorkerMessage::SkipWaiting),
        )
        .await;

        match delivered {
            Ok(Ok(())) => {
                let previous = self
                    .reloaded_for
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .replace(waiting.id);
                if previous != Some(waiting.id) {
                    info!(worker = waiting.id.raw(), "Update handed off, reloading");
                    self.location.reload();
                }
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to hand off update");
                false
            }
            Err(e) => {
                warn!(error = %e, "Waiting worker did not acknowledge");
                false
            }
        }
    }
}

impl Drop for UpdateCoordinator {
    fn drop(&mut self) {
        for id in self.listeners.drain(..) {
            self.events.remove_listener(id);
        }
    }
}
