//! Scripted install invitation.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::install::{InstallPrompt, UserChoice};
use crate::{PlatformError, PlatformResult};

/// An invitation whose user response is decided up front.
///
/// Enforces the platform rules: it can be presented once, and not at all if
/// the page failed to suppress the default UI when it was offered.
#[derive(Debug)]
pub struct ScriptedInstallPrompt {
    choice: UserChoice,
    fail: bool,
    delay: Duration,
    prompt_calls: AtomicU32,
    consumed: AtomicBool,
    discarded: AtomicBool,
}

impl ScriptedInstallPrompt {
    pub fn new(choice: UserChoice) -> Self {
        Self {
            choice,
            fail: false,
            delay: Duration::ZERO,
            prompt_calls: AtomicU32::new(0),
            consumed: AtomicBool::new(false),
            discarded: AtomicBool::new(false),
        }
    }

    /// An invitation whose presentation fails at platform level.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(UserChoice::Dismissed)
        }
    }

    /// Time the simulated user takes to answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of times `prompt()` was called, including rejected calls.
    pub fn prompt_calls(&self) -> u32 {
        self.prompt_calls.load(Ordering::SeqCst)
    }

    /// Whether the platform has taken the invitation back.
    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::SeqCst)
    }

    pub(crate) fn discard(&self) {
        self.discarded.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl InstallPrompt for ScriptedInstallPrompt {
    async fn prompt(&self) -> PlatformResult<UserChoice> {
        self.prompt_calls.fetch_add(1, Ordering::SeqCst);

        if self.is_discarded() {
            return Err(PlatformError::InvalidState(
                "invitation was claimed by the platform UI".to_string(),
            ));
        }
        if self.consumed.swap(true, Ordering::SeqCst) {
            return Err(PlatformError::InvalidState(
                "prompt() can only be called once".to_string(),
            ));
        }
        if self.fail {
            return Err(PlatformError::NotSupported("install dialog unavailable".to_string()));
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        debug!(choice = ?self.choice, "Install prompt answered");
        Ok(self.choice)
    }
}
