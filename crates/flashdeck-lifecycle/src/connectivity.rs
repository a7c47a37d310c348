//! Connectivity monitoring.
//!
//! `online` mirrors the platform's binary signal with no smoothing. Quality is
//! only refreshed by an explicit [`ConnectivityMonitor::test_connection`] call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flashdeck_common::{with_timeout, LifecycleConfig, Result};
use flashdeck_platform::{
    CacheMode, EventKind, EventTarget, FetchRequest, Fetcher, ListenerId, Navigator, Platform,
};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::store::{Store, Subscription};

/// Connection quality as classified by the last probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Fast,
    Slow,
    Offline,
}

impl ConnectionQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionQuality::Fast => "fast",
            ConnectionQuality::Slow => "slow",
            ConnectionQuality::Offline => "offline",
        }
    }
}

/// Connectivity snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectivityState {
    /// Platform connectivity, updated on every `online`/`offline` event.
    pub online: bool,

    /// Result of the last probe. `Offline` until the first probe runs, even
    /// while `online` is true.
    pub quality: ConnectionQuality,

    /// Round-trip time of the last successful probe.
    pub latency: Option<Duration>,
}

/// Tracks reachability and classifies connection quality on demand.
pub struct ConnectivityMonitor {
    state: Store<ConnectivityState>,
    navigator: Arc<dyn Navigator>,
    network: Arc<dyn Fetcher>,
    probe_url: Url,
    slow_threshold: Duration,
    probe_timeout: Duration,
    probes: AtomicU64,
    events: Arc<EventTarget>,
    listeners: Vec<ListenerId>,
}

impl ConnectivityMonitor {
    pub fn new(platform: &Platform, config: &LifecycleConfig) -> Result<Self> {
        let probe_url = config.resolve(&config.probe_url)?;
        let state = Store::new(ConnectivityState {
            online: platform.navigator.on_line(),
            quality: ConnectionQuality::Offline,
            latency: None,
        });

        let on_online = state.clone();
        let online = platform.events.add_listener(EventKind::Online, move |_| {
            on_online.update(|s| s.online = true);
        });
        let on_offline = state.clone();
        let offline = platform.events.add_listener(EventKind::Offline, move |_| {
            on_offline.update(|s| s.online = false);
        });

        debug!(probe = %probe_url, "ConnectivityMonitor initialized");

        Ok(Self {
            state,
            navigator: Arc::clone(&platform.navigator),
            network: Arc::clone(&platform.network),
            probe_url,
            slow_threshold: config.slow_threshold(),
            probe_timeout: config.probe_timeout(),
            probes: AtomicU64::new(0),
            events: Arc::clone(&platform.events),
            listeners: vec![online, offline],
        })
    }

    /// Last reachability reported by the platform's online/offline events.
    pub fn online(&self) -> bool {
        self.state.get().online
    }

    /// Quality from the last probe.
    pub fn quality(&self) -> ConnectionQuality {
        self.state.get().quality
    }

    /// Current online flag, quality and latency together.
    pub fn state(&self) -> ConnectivityState {
        self.state.get()
    }

    /// Subscribe to connectivity. Invoked immediately with the current state,
    /// then on every `online`/`offline` event and every probe result.
    pub fn on_network_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectivityState) + Send + Sync + 'static,
    {
        self.state.subscribe(callback)
    }

    /// Probe the network and classify the connection. Never fails: every
    /// failure path classifies as `Offline`.
    ///
    /// A round trip of exactly the slow threshold is still `Fast`.
    pub async fn test_connection(&self) -> ConnectionQuality {
        let (quality, latency) = if self.navigator.on_line() {
            self.probe().await
        } else {
            debug!("Platform reports offline, skipping probe");
            (ConnectionQuality::Offline, None)
        };

        self.state.update(|s| {
            s.quality = quality;
            s.latency = latency;
        });
        quality
    }

    async fn probe(&self) -> (ConnectionQuality, Option<Duration>) {
        let request = FetchRequest::get(self.probe_url.clone())
            .cache(CacheMode::NoStore)
            .timeout(self.probe_timeout)
            .cache_busted(self.cache_bust_token());

        let started = Instant::now();
        let outcome = with_timeout(self.probe_timeout, self.network.fetch(request)).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(_response)) => {
                let quality = classify(elapsed, self.slow_threshold);
                info!(
                    latency_ms = elapsed.as_millis() as u64,
                    quality = quality.as_str(),
                    "Connection probed"
                );
                (quality, Some(elapsed))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Connection probe failed");
                (ConnectionQuality::Offline, None)
            }
            Err(e) => {
                warn!(error = %e, "Connection probe timed out");
                (ConnectionQuality::Offline, None)
            }
        }
    }

    fn cache_bust_token(&self) -> u128 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        now + u128::from(self.probes.fetch_add(1, Ordering::Relaxed))
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        for id in self.listeners.drain(..) {
            self.events.remove_listener(id);
        }
    }
}

/// Whole milliseconds over the threshold count as slow.
fn classify(elapsed: Duration, threshold: Duration) -> ConnectionQuality {
    if elapsed.as_millis() > threshold.as_millis() {
        ConnectionQuality::Slow
    } else {
        ConnectionQuality::Fast
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashdeck_platform::{HeadlessPlatform, ScriptedResponse};
    use std::sync::Mutex;

    const PROBE: &str = "http://localhost/favicon.ico";

    fn monitor(platform: &HeadlessPlatform) -> ConnectivityMonitor {
        ConnectivityMonitor::new(&platform.handle(), &LifecycleConfig::default()).unwrap()
    }

    #[test]
    fn test_classify_boundary() {
        let threshold = Duration::from_millis(1000);
        assert_eq!(classify(Duration::from_millis(999), threshold), ConnectionQuality::Fast);
        assert_eq!(classify(Duration::from_millis(1000), threshold), ConnectionQuality::Fast);
        assert_eq!(
            classify(Duration::from_micros(1_000_900), threshold),
            ConnectionQuality::Fast
        );
        assert_eq!(classify(Duration::from_millis(1001), threshold), ConnectionQuality::Slow);
    }

    #[test]
    fn test_initial_state_unprobed() {
        let platform = HeadlessPlatform::new();
        let monitor = monitor(&platform);
        assert!(monitor.online());
        assert_eq!(monitor.quality(), ConnectionQuality::Offline);
        assert_eq!(monitor.state().latency, None);
    }

    #[test]
    fn test_online_mirrors_every_event() {
        let platform = HeadlessPlatform::new();
        let monitor = monitor(&platform);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        monitor.on_network_change(move |s| log.lock().unwrap().push(s.online));

        platform.set_online(false);
        platform.set_online(false);
        platform.set_online(true);

        assert_eq!(*seen.lock().unwrap(), vec![true, false, false, true]);
        assert!(monitor.online());
    }

    #[test]
    fn test_events_do_not_touch_quality() {
        let platform = HeadlessPlatform::new();
        let monitor = monitor(&platform);
        platform.set_online(false);
        platform.set_online(true);
        assert_eq!(monitor.quality(), ConnectionQuality::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_probe() {
        let platform = HeadlessPlatform::new();
        platform.network().route(
            PROBE,
            ScriptedResponse::ok("").with_latency(Duration::from_millis(120)),
        );
        let monitor = monitor(&platform);

        assert_eq!(monitor.test_connection().await, ConnectionQuality::Fast);
        assert_eq!(monitor.state().latency, Some(Duration::from_millis(120)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_request_bypasses_caches() {
        let platform = HeadlessPlatform::new();
        platform.network().route(PROBE, ScriptedResponse::ok(""));
        let monitor = monitor(&platform);

        monitor.test_connection().await;
        monitor.test_connection().await;

        let requests = platform.network().requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].cache, CacheMode::NoStore);
        assert!(requests[0].url.query().is_some_and(|q| q.starts_with("_=")));
        assert_ne!(requests[0].url, requests[1].url);
    }

    #[tokio::test]
    async fn test_offline_platform_skips_probe() {
        let platform = HeadlessPlatform::new().with_online(false);
        let monitor = monitor(&platform);

        assert_eq!(monitor.test_connection().await, ConnectionQuality::Offline);
        assert!(platform.network().requests().is_empty());
    }

    #[tokio::test]
    async fn test_error_status_still_measures_reachability() {
        let platform = HeadlessPlatform::new();
        let monitor = monitor(&platform);

        // Unrouted probe answers 404: the server was reached.
        assert_eq!(monitor.test_connection().await, ConnectionQuality::Fast);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_times_out_offline() {
        let platform = HeadlessPlatform::new();
        platform.network().route(PROBE, ScriptedResponse::hang());
        let monitor = monitor(&platform);

        assert_eq!(monitor.test_connection().await, ConnectionQuality::Offline);
        assert!(monitor.online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_result_published() {
        let platform = HeadlessPlatform::new();
        platform.network().route(
            PROBE,
            ScriptedResponse::ok("").with_latency(Duration::from_millis(1500)),
        );
        let monitor = monitor(&platform);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        monitor.on_network_change(move |s| log.lock().unwrap().push(s.quality));

        monitor.test_connection().await;
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectionQuality::Offline, ConnectionQuality::Slow]
        );
    }

    #[test]
    fn test_invalid_probe_url_rejected() {
        let platform = HeadlessPlatform::new();
        let config = LifecycleConfig {
            base_url: "not a url".to_string(),
            ..LifecycleConfig::default()
        };
        assert!(ConnectivityMonitor::new(&platform.handle(), &config).is_err());
    }
}
