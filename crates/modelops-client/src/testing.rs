//! In-memory transport for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::ClientConfig;
use crate::error::SdkError;
use crate::http::{ApiRequest, ApiResponse, Method, Transport};
use crate::session::Session;

pub(crate) const USER_TOKEN: &str = "user-token";

/// Scripted transport.
///
/// Responses are queued per `(method, path)`. The last queued response of a
/// route is repeated once the others are used up. A request to a route with
/// nothing queued panics, so tests fail loudly on unexpected calls.
#[derive(Default)]
pub(crate) struct MockTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<ApiResponse>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a response for a route.
    pub(crate) fn on(&self, method: Method, path: &str, status: u16, body: &str) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(ApiResponse::new(status, body.as_bytes().to_vec()));
        self
    }

    /// Queue a JSON response for a route.
    pub(crate) fn on_json(
        &self,
        method: Method,
        path: &str,
        status: u16,
        body: serde_json::Value,
    ) -> &Self {
        self.on(method, path, status, &body.to_string())
    }

    pub(crate) fn total(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn count(&self, method: Method, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    pub(crate) fn last(&self, method: Method, path: &str) -> Option<ApiRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.method == method && r.path == path)
            .cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SdkError> {
        let key = (request.method, request.path.clone());
        self.requests.lock().unwrap().push(request);

        let mut routes = self.routes.lock().unwrap();
        let queue = routes
            .get_mut(&key)
            .unwrap_or_else(|| panic!("unexpected request: {} {}", key.0.as_str(), key.1));
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(response.unwrap_or_else(|| panic!("no response left for {} {}", key.0.as_str(), key.1)))
    }
}

pub(crate) fn test_config() -> ClientConfig {
    ClientConfig {
        token: USER_TOKEN.to_string(),
        ..ClientConfig::default()
    }
}

pub(crate) fn test_session(mock: &Arc<MockTransport>) -> Session {
    Session::new(mock.clone(), test_config())
}

pub(crate) fn session_with(mock: &Arc<MockTransport>, config: ClientConfig) -> Session {
    Session::new(mock.clone(), config)
}
