//! Scripted network.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use tracing::trace;
use url::Url;

use super::HeadlessNavigator;
use crate::fetch::{FetchRequest, FetchResponse, Fetcher};
use crate::navigator::Navigator;
use crate::{PlatformError, PlatformResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Respond,
    Fail,
    Hang,
}

/// How the network answers one URL.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    status: u16,
    body: Bytes,
    latency: Duration,
    outcome: Outcome,
}

impl ScriptedResponse {
    /// A 200 response with the given body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::status(200, body)
    }

    /// A response with an arbitrary status.
    pub fn status(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            latency: Duration::ZERO,
            outcome: Outcome::Respond,
        }
    }

    /// A transport failure.
    pub fn failure() -> Self {
        Self {
            outcome: Outcome::Fail,
            ..Self::status(0, Bytes::new())
        }
    }

    /// A request that never completes.
    pub fn hang() -> Self {
        Self {
            outcome: Outcome::Hang,
            ..Self::status(0, Bytes::new())
        }
    }

    /// Simulated round-trip time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// Network whose answers are scripted per URL (query and fragment ignored).
/// Unscripted URLs answer 404.
pub struct HeadlessNetwork {
    navigator: Arc<HeadlessNavigator>,
    routes: RwLock<HashMap<String, ScriptedResponse>>,
    requests: RwLock<Vec<FetchRequest>>,
}

impl HeadlessNetwork {
    pub(super) fn new(navigator: Arc<HeadlessNavigator>) -> Self {
        Self {
            navigator,
            routes: RwLock::new(HashMap::new()),
            requests: RwLock::new(Vec::new()),
        }
    }

    /// Script the answer for a URL.
    pub fn route(&self, url: &str, response: ScriptedResponse) {
        let key = Url::parse(url)
            .map(|u| route_key(&u))
            .unwrap_or_else(|_| url.to_string());
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, response);
    }

    /// Every request issued so far, in order.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lookup(&self, url: &Url) -> Option<ScriptedResponse> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&route_key(url))
            .cloned()
    }

    async fn answer(&self, request: &FetchRequest) -> PlatformResult<FetchResponse> {
        let scripted = self
            .lookup(&request.url)
            .unwrap_or_else(|| ScriptedResponse::status(404, Bytes::new()));

        if scripted.outcome == Outcome::Hang {
            std::future::pending::<()>().await;
        }
        if !scripted.latency.is_zero() {
            tokio::time::sleep(scripted.latency).await;
        }
        if scripted.outcome == Outcome::Fail {
            return Err(PlatformError::Network(format!("failed to fetch {}", request.url)));
        }

        Ok(FetchResponse {
            url: request.url.clone(),
            status: scripted.status,
            headers: HashMap::new(),
            body: scripted.body,
        })
    }
}

fn route_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.to_string()
}

#[async_trait]
impl Fetcher for HeadlessNetwork {
    async fn fetch(&self, request: FetchRequest) -> PlatformResult<FetchResponse> {
        trace!(url = %request.url, "Headless fetch");
        self.requests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if !self.navigator.on_line() {
            return Err(PlatformError::Network("network is offline".to_string()));
        }

        match request.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.answer(&request))
                .await
                .map_err(|_| PlatformError::Timeout(timeout))?,
            None => self.answer(&request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::HeadlessPlatform;
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_scripted_route_ignores_query() {
        let platform = HeadlessPlatform::new();
        platform
            .network()
            .route("http://localhost/favicon.ico", ScriptedResponse::ok("icon"));

        let response = platform
            .network()
            .fetch(FetchRequest::get(url("http://localhost/favicon.ico")).cache_busted(9))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"icon");
        assert_eq!(platform.network().requests().len(), 1);
    }

    #[tokio::test]
    async fn test_unscripted_route_is_404() {
        let platform = HeadlessPlatform::new();
        let response = platform
            .network()
            .fetch(FetchRequest::get(url("http://localhost/nope")))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_offline_fails_every_request() {
        let platform = HeadlessPlatform::new().with_online(false);
        platform
            .network()
            .route("http://localhost/a", ScriptedResponse::ok("a"));

        let err = platform
            .network()
            .fetch(FetchRequest::get(url("http://localhost/a")))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Network(_)));
    }

    #[tokio::test]
    async fn test_failure_route() {
        let platform = HeadlessPlatform::new();
        platform
            .network()
            .route("http://localhost/a", ScriptedResponse::failure());

        assert!(platform
            .network()
            .fetch(FetchRequest::get(url("http://localhost/a")))
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_honors_request_timeout() {
        let platform = HeadlessPlatform::new();
        platform
            .network()
            .route("http://localhost/a", ScriptedResponse::hang());

        let err = platform
            .network()
            .fetch(FetchRequest::get(url("http://localhost/a")).timeout(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err, PlatformError::Timeout(Duration::from_secs(5)));
    }
}
