//! Service worker seam.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::PlatformResult;

/// Identity of one worker instance across slot moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Script fetched, not yet installing.
    #[default]
    Parsed,
    /// Running its install step.
    Installing,
    /// Installed; waits while another worker controls the page.
    Installed,
    /// Taking over.
    Activating,
    /// Controls the page.
    Activated,
    /// Superseded, or its install failed.
    Redundant,
}

/// A read-only view of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub state: WorkerState,
}

/// Messages the page sends to a waiting worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerMessage {
    /// Ask the waiting worker to activate immediately.
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
}

/// A service worker registration (`ServiceWorkerRegistration`).
#[async_trait]
pub trait WorkerRegistration: Send + Sync {
    fn installing(&self) -> Option<WorkerInfo>;

    fn waiting(&self) -> Option<WorkerInfo>;

    fn active(&self) -> Option<WorkerInfo>;

    /// Ask the registration to check its script source. Returns whether a
    /// newer version was found; finding one only starts its installation.
    async fn update(&self) -> PlatformResult<bool>;

    /// Post a message to the waiting worker.
    async fn post_message(&self, message: WorkerMessage) -> PlatformResult<()>;
}

/// The page's service worker container (`navigator.serviceWorker`).
pub trait ServiceWorkerContainer: Send + Sync {
    /// The registration covering this page, if any.
    fn registration(&self) -> Option<Arc<dyn WorkerRegistration>>;

    /// The worker currently controlling this page.
    fn controller(&self) -> Option<WorkerInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_uniqueness() {
        assert_ne!(WorkerId::new(), WorkerId::new());
    }

    #[test]
    fn test_skip_waiting_wire_format() {
        assert_eq!(
            serde_json::to_string(&WorkerMessage::SkipWaiting).unwrap(),
            "\"SKIP_WAITING\""
        );
    }

    #[test]
    fn test_default_state() {
        assert_eq!(WorkerState::default(), WorkerState::Parsed);
        assert_eq!(serde_json::to_string(&WorkerState::Installed).unwrap(), "\"installed\"");
    }
}
