// Stub moderation service for integration tests.
//
// Serves the four endpoints on an ephemeral localhost port. Each route's
// reply (status, body, delay) can be swapped at any time, and every request
// is recorded before the reply is produced, so a delayed reply still counts
// as a hit.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use modgate::{ClientConfig, ModerationClient};
use serde_json::{json, Value};
use tokio::sync::oneshot;

pub const API_KEY: &str = "test-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Policy,
    CheckText,
    Image,
    Events,
}

/// A canned reply for one route.
#[derive(Debug, Clone)]
pub struct Reply {
    status: StatusCode,
    body: String,
    delay: Duration,
}

impl Reply {
    pub fn json(value: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: value.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn status(code: u16) -> Self {
        Self {
            status: StatusCode::from_u16(code).expect("valid status code"),
            body: json!({"error": format!("stub returned {code}")}).to_string(),
            delay: Duration::ZERO,
        }
    }

    /// A 200 with a body that is not JSON.
    pub fn garbage() -> Self {
        Self {
            status: StatusCode::OK,
            body: "<html>upstream exploded</html>".to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// One request as the stub saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub route: Route,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl Recorded {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("recorded body should be JSON")
    }
}

#[derive(Clone)]
struct StubState {
    replies: Arc<Mutex<HashMap<Route, Reply>>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

pub struct StubServer {
    base_url: String,
    state: StubState,
    shutdown: Option<oneshot::Sender<()>>,
}

pub fn default_policy() -> Value {
    json!({
        "blockToxicity": true,
        "blockSexual": true,
        "blockNsfwImages": true,
        "toxicityThreshold": 0.8,
        "sexualThreshold": 0.9,
        "nsfwThreshold": 0.85
    })
}

impl StubServer {
    /// Start a stub with healthy defaults on every route.
    pub async fn start() -> Self {
        let mut replies = HashMap::new();
        replies.insert(Route::Policy, Reply::json(default_policy()));
        replies.insert(Route::CheckText, Reply::json(json!({"isTextPermitted": true})));
        replies.insert(
            Route::Image,
            Reply::json(json!({"decision": "ALLOW", "nsfwScore": 0.1, "reasons": []})),
        );
        replies.insert(Route::Events, Reply::json(json!({"ok": true})));

        let state = StubState {
            replies: Arc::new(Mutex::new(replies)),
            requests: Arc::new(Mutex::new(Vec::new())),
        };

        let app = Router::new()
            .route(
                "/v1/policy",
                get(|State(s): State<StubState>, headers: HeaderMap, body: Bytes| {
                    handle(s, Route::Policy, headers, body)
                }),
            )
            .route(
                "/checkText",
                post(|State(s): State<StubState>, headers: HeaderMap, body: Bytes| {
                    handle(s, Route::CheckText, headers, body)
                }),
            )
            .route(
                "/v1/moderate/image",
                post(|State(s): State<StubState>, headers: HeaderMap, body: Bytes| {
                    handle(s, Route::Image, headers, body)
                }),
            )
            .route(
                "/v1/events",
                post(|State(s): State<StubState>, headers: HeaderMap, body: Bytes| {
                    handle(s, Route::Events, headers, body)
                }),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub listener");
        let addr = listener.local_addr().expect("stub local addr");
        let (tx, rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            shutdown: Some(tx),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set(&self, route: Route, reply: Reply) {
        self.state.replies.lock().unwrap().insert(route, reply);
    }

    pub fn requests(&self, route: Route) -> Vec<Recorded> {
        self.state
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.route == route)
            .cloned()
            .collect()
    }

    pub fn hits(&self, route: Route) -> usize {
        self.requests(route).len()
    }

    /// Poll until `route` has seen at least `count` requests, or `within` elapses.
    pub async fn wait_for_hits(&self, route: Route, count: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if self.hits(route) >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Client config pointed at this stub with a short deadline.
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            timeout_ms: 500,
            ..ClientConfig::new(self.base_url.clone())
        }
    }

    pub fn client(&self) -> ModerationClient {
        self.client_with(self.config())
    }

    pub fn client_with(&self, config: ClientConfig) -> ModerationClient {
        ModerationClient::init(API_KEY, config).expect("client init")
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn handle(state: StubState, route: Route, headers: HeaderMap, body: Bytes) -> Response {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    state.requests.lock().unwrap().push(Recorded {
        route,
        authorization: header_value(header::AUTHORIZATION),
        content_type: header_value(header::CONTENT_TYPE),
        body,
    });

    let reply = state
        .replies
        .lock()
        .unwrap()
        .get(&route)
        .cloned()
        .unwrap_or_else(|| Reply::status(404));

    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    (
        reply.status,
        [(header::CONTENT_TYPE, "application/json")],
        reply.body,
    )
        .into_response()
}

/// A client whose base URL refuses connections.
pub fn unreachable_client(timeout_ms: u64) -> ModerationClient {
    let config = ClientConfig {
        timeout_ms,
        ..ClientConfig::new("http://127.0.0.1:1")
    };
    ModerationClient::init(API_KEY, config).expect("client init")
}
