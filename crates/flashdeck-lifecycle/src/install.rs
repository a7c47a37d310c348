//! Installability coordination.
//!
//! Captures the platform's one-shot install invitation and runs the consent
//! flow. The capture listener calls `prevent_default()` synchronously inside
//! dispatch; deferring it would let the platform keep the invitation.

use std::sync::{Arc, Mutex, PoisonError};

use flashdeck_platform::{
    EventKind, EventTarget, InstallPrompt, ListenerId, Platform, PlatformEvent,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::store::{Store, Subscription};

/// Install state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallState {
    /// No invitation held.
    #[default]
    Idle,
    /// An invitation is held and can be presented.
    Promptable,
    /// The invitation is being presented.
    Prompting,
    /// The app runs installed.
    Installed,
}

impl InstallState {
    pub fn is_installable(&self) -> bool {
        matches!(self, InstallState::Promptable)
    }

    pub fn is_installed(&self) -> bool {
        matches!(self, InstallState::Installed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallState::Idle => "idle",
            InstallState::Promptable => "promptable",
            InstallState::Prompting => "prompting",
            InstallState::Installed => "installed",
        }
    }
}

struct Shared {
    state: Store<InstallState>,
    invitation: Mutex<Option<Arc<dyn InstallPrompt>>>,
}

impl Shared {
    fn capture(&self, invitation: Arc<dyn InstallPrompt>) {
        if self.state.get().is_installed() {
            debug!("Install invitation ignored, app already installed");
            return;
        }
        *self.invitation.lock().unwrap_or_else(PoisonError::into_inner) = Some(invitation);
        self.state.modify(|state| {
            if *state == InstallState::Idle {
                *state = InstallState::Promptable;
            }
        });
        debug!("Install invitation captured");
    }

    fn installed(&self) {
        self.take_invitation();
        self.state.modify(|state| *state = InstallState::Installed);
        info!("App installed");
    }

    fn take_invitation(&self) -> Option<Arc<dyn InstallPrompt>> {
        self.invitation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn holds_invitation(&self) -> bool {
        self.invitation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Mediates the install invitation and the one-shot consent flow.
pub struct InstallabilityCoordinator {
    shared: Arc<Shared>,
    events: Arc<EventTarget>,
    listeners: Vec<ListenerId>,
}

impl InstallabilityCoordinator {
    /// Create the coordinator and attach its platform listeners.
    pub fn new(platform: &Platform) -> Self {
        let initial = if platform.navigator.display_mode_standalone() {
            InstallState::Installed
        } else {
            InstallState::Idle
        };

        let shared = Arc::new(Shared {
            state: Store::new(initial),
            invitation: Mutex::new(None),
        });

        let on_installable = Arc::clone(&shared);
        let capture = platform
            .events
            .add_listener(EventKind::BeforeInstallPrompt, move |event| {
                if let PlatformEvent::BeforeInstallPrompt(prompt_event) = event {
                    prompt_event.prevent_default();
                    on_installable.capture(prompt_event.invitation());
                }
            });

        let on_installed = Arc::clone(&shared);
        let installed = platform
            .events
            .add_listener(EventKind::AppInstalled, move |_| on_installed.installed());

        debug!(state = initial.as_str(), "InstallabilityCoordinator initialized");

        Self {
            shared,
            events: Arc::clone(&platform.events),
            listeners: vec![capture, installed],
        }
    }

    /// Current install state.
    pub fn state(&self) -> InstallState {
        self.shared.state.get()
    }

    /// An install invitation is held and can be shown.
    pub fn is_installable(&self) -> bool {
        self.state().is_installable()
    }

    /// Running standalone, or `appinstalled` has fired.
    pub fn is_installed(&self) -> bool {
        self.state().is_installed()
    }

    /// Subscribe to install state. The callback runs immediately with the
    /// current state, then on every transition.
    pub fn on_installable_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&InstallState) + Send + Sync + 'static,
    {
        self.shared.state.subscribe(callback)
    }

    /// Present the held invitation. Resolves true only if the user accepted.
    ///
    /// The invitation is taken before the dialog is awaited, so a concurrent
    /// call finds nothing and resolves false. It is never presented twice.
    /// Acceptance does not mark the app installed; only the platform's
    /// `appinstalled` signal does.
    pub async fn prompt_install(&self) -> bool {
        let Some(invitation) = self.shared.take_invitation() else {
            debug!("No install invitation held");
            return false;
        };

        self.shared.state.modify(|state| {
            if *state != InstallState::Installed {
                *state = InstallState::Prompting;
            }
        });

        let outcome = invitation.prompt().await;
        drop(invitation);

        let next = if self.shared.holds_invitation() {
            InstallState::Promptable
        } else {
            InstallState::Idle
        };
        self.shared.state.modify(|state| {
            if *state == InstallState::Prompting {
                *state = next;
            }
        });

        match outcome {
            Ok(choice) => {
                info!(?choice, "Install prompt answered");
                choice.is_accepted()
            }
            Err(e) => {
                warn!(error = %e, "Install prompt failed");
                false
            }
        }
    }
}

impl Drop for InstallabilityCoordinator {
    fn drop(&mut self) {
        for id in self.listeners.drain(..) {
            self.events.remove_listener(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashdeck_platform::{HeadlessPlatform, ScriptedInstallPrompt, UserChoice};
    use std::time::Duration;

    fn invitation(choice: UserChoice) -> Arc<ScriptedInstallPrompt> {
        Arc::new(ScriptedInstallPrompt::new(choice))
    }

    #[test]
    fn test_initial_state_idle() {
        let platform = HeadlessPlatform::new();
        let install = InstallabilityCoordinator::new(&platform.handle());
        assert_eq!(install.state(), InstallState::Idle);
        assert!(!install.is_installable());
    }

    #[test]
    fn test_standalone_seeds_installed() {
        let platform = HeadlessPlatform::new().with_standalone(true);
        let install = InstallabilityCoordinator::new(&platform.handle());
        assert!(install.is_installed());
    }

    #[test]
    fn test_capture_suppresses_default_ui() {
        let platform = HeadlessPlatform::new();
        let install = InstallabilityCoordinator::new(&platform.handle());

        let prompt = invitation(UserChoice::Accepted);
        assert!(platform.fire_installable(prompt.clone()));
        assert!(!prompt.is_discarded());
        assert_eq!(install.state(), InstallState::Promptable);
    }

    #[tokio::test]
    async fn test_prompt_without_invitation_is_noop() {
        let platform = HeadlessPlatform::new();
        let install = InstallabilityCoordinator::new(&platform.handle());
        assert!(!install.prompt_install().await);
        assert_eq!(install.state(), InstallState::Idle);
    }

    #[tokio::test]
    async fn test_accepted_prompt_does_not_mark_installed() {
        let platform = HeadlessPlatform::new();
        let install = InstallabilityCoordinator::new(&platform.handle());
        platform.fire_installable(invitation(UserChoice::Accepted));

        assert!(install.prompt_install().await);
        assert_eq!(install.state(), InstallState::Idle);

        platform.fire_app_installed();
        assert_eq!(install.state(), InstallState::Installed);
    }

    #[tokio::test]
    async fn test_invitation_is_single_use() {
        let platform = HeadlessPlatform::new();
        let install = InstallabilityCoordinator::new(&platform.handle());
        let prompt = invitation(UserChoice::Dismissed);
        platform.fire_installable(prompt.clone());

        assert!(!install.prompt_install().await);
        assert!(!install.prompt_install().await);
        assert_eq!(prompt.prompt_calls(), 1);

        let fresh = invitation(UserChoice::Accepted);
        platform.fire_installable(fresh.clone());
        assert!(install.prompt_install().await);
        assert_eq!(fresh.prompt_calls(), 1);
    }

    #[tokio::test]
    async fn test_platform_failure_resolves_false() {
        let platform = HeadlessPlatform::new();
        let install = InstallabilityCoordinator::new(&platform.handle());
        platform.fire_installable(Arc::new(ScriptedInstallPrompt::failing()));

        assert!(!install.prompt_install().await);
        assert_eq!(install.state(), InstallState::Idle);
        assert!(!install.prompt_install().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_prompts_present_once() {
        let platform = HeadlessPlatform::new();
        let install = InstallabilityCoordinator::new(&platform.handle());
        let prompt = Arc::new(
            ScriptedInstallPrompt::new(UserChoice::Accepted).with_delay(Duration::from_secs(2)),
        );
        platform.fire_installable(prompt.clone());

        let (first, second) = tokio::join!(install.prompt_install(), install.prompt_install());
        assert!(first);
        assert!(!second);
        assert_eq!(prompt.prompt_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_is_prompting_while_presented() {
        let platform = HeadlessPlatform::new();
        let install = Arc::new(InstallabilityCoordinator::new(&platform.handle()));
        platform.fire_installable(Arc::new(
            ScriptedInstallPrompt::new(UserChoice::Dismissed).with_delay(Duration::from_secs(1)),
        ));

        let states = Arc::new(Mutex::new(Vec::new()));
        let log = states.clone();
        install.on_installable_change(move |s| log.lock().unwrap().push(*s));

        install.prompt_install().await;
        assert_eq!(
            *states.lock().unwrap(),
            vec![
                InstallState::Promptable,
                InstallState::Prompting,
                InstallState::Idle
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invitation_arriving_mid_prompt_is_kept() {
        let platform = HeadlessPlatform::new();
        let install = InstallabilityCoordinator::new(&platform.handle());
        platform.fire_installable(Arc::new(
            ScriptedInstallPrompt::new(UserChoice::Dismissed).with_delay(Duration::from_secs(1)),
        ));

        let next = invitation(UserChoice::Accepted);
        let fire_later = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            platform.fire_installable(next.clone());
        };
        let (answered, _) = tokio::join!(install.prompt_install(), fire_later);

        assert!(!answered);
        assert_eq!(install.state(), InstallState::Promptable);
        assert!(install.prompt_install().await);
    }

    #[test]
    fn test_late_subscriber_sees_current_state() {
        let platform = HeadlessPlatform::new();
        let install = InstallabilityCoordinator::new(&platform.handle());
        platform.fire_installable(invitation(UserChoice::Accepted));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        install.on_installable_change(move |s| log.lock().unwrap().push(*s));
        assert_eq!(*seen.lock().unwrap(), vec![InstallState::Promptable]);
    }

    #[tokio::test]
    async fn test_installed_drops_held_invitation() {
        let platform = HeadlessPlatform::new();
        let install = InstallabilityCoordinator::new(&platform.handle());
        let prompt = invitation(UserChoice::Accepted);
        platform.fire_installable(prompt.clone());

        platform.fire_app_installed();
        assert!(!install.prompt_install().await);
        assert_eq!(prompt.prompt_calls(), 0);

        platform.fire_installable(invitation(UserChoice::Accepted));
        assert!(install.is_installed());
    }

    #[test]
    fn test_drop_detaches_listeners() {
        let platform = HeadlessPlatform::new();
        let install = InstallabilityCoordinator::new(&platform.handle());
        assert!(platform.events().has_listeners(EventKind::BeforeInstallPrompt));

        drop(install);
        assert!(!platform.events().has_listeners(EventKind::BeforeInstallPrompt));
        assert!(!platform.fire_installable(invitation(UserChoice::Accepted)));
    }
}
