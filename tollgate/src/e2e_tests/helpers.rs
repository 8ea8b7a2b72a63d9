//! Common helpers for end-to-end tests.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use crate::authority::Authority;
use crate::http::{AppState, SECRET_HEADER, router};
use crate::registry::RuleRegistry;
use crate::store::watch::{WatchConfig, spawn_watch};
use crate::store::{MemoryBackend, RuleStore, StoreError};

pub const SECRET: &str = "e2e-secret";
pub const PREFIX: &str = "/e2e";

/// How long to wait for a watch event to reach a registry.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// One service instance: router, registry and a running watch task.
pub struct TestService {
    pub backend: MemoryBackend,
    pub store: Arc<RuleStore<MemoryBackend>>,
    app: Router,
    shutdown: watch::Sender<bool>,
    watch_task: Option<JoinHandle<Result<(), StoreError>>>,
}

impl TestService {
    /// A single instance over a fresh store.
    pub async fn new() -> Self {
        Self::start(MemoryBackend::new(), true).await
    }

    /// A single instance with strict refresh binding turned off.
    pub async fn lenient() -> Self {
        Self::start(MemoryBackend::new(), false).await
    }

    /// Another instance over the same store, like a second replica.
    pub async fn sibling(&self) -> Self {
        Self::start(self.backend.clone(), true).await
    }

    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    async fn start(backend: MemoryBackend, strict_refresh_binding: bool) -> Self {
        let registry = Arc::new(RuleRegistry::new());
        let store = Arc::new(RuleStore::new(
            backend.clone(),
            PREFIX,
            Arc::clone(&registry),
            Duration::from_secs(1),
        ));
        store.load_all_rules().await.expect("initial load");

        let watchers = backend.watcher_count();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let watch_task = spawn_watch(Arc::clone(&store), WatchConfig::default(), shutdown_rx);
        // from here on later writes arrive as live events
        wait_until(|| backend.watcher_count() > watchers).await;

        let authority = Arc::new(Authority::new(registry, strict_refresh_binding));
        let app = router(AppState::new(authority, Arc::clone(&store), SECRET));
        Self {
            backend,
            store,
            app,
            shutdown,
            watch_task: Some(watch_task),
        }
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        self.store.registry()
    }

    pub fn has_rule(&self, name: &str) -> bool {
        self.registry().contains(name).expect("registry")
    }

    /// Send a request with the shared secret and return the status and the
    /// JSON body (`Value::Null` when the body is empty).
    pub async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(SECRET_HEADER, SECRET);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).expect("request")).await
    }

    /// Send a prepared request as is.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        if bytes.is_empty() {
            return (status, Value::Null);
        }
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    /// Add a rule through the admin API and wait for the watch to register it.
    pub async fn add_rule(&self, rule: Value) {
        let name = rule["name"].as_str().expect("rule name").to_string();
        let (status, body) = self.call(Method::POST, "/rule/", Some(rule)).await;
        assert_eq!(status, StatusCode::NO_CONTENT, "add rule failed: {body}");
        self.wait_for_rule(&name, true).await;
    }

    pub async fn wait_for_rule(&self, name: &str, present: bool) {
        wait_until(|| self.has_rule(name) == present).await;
    }

    /// `POST /auth` for `name` with a payload; returns the response body.
    pub async fn sign(&self, name: &str, payload: &str) -> Value {
        let (status, body) = self
            .call(
                Method::POST,
                "/auth",
                Some(json!({"name": name, "payload": payload})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "sign failed: {body}");
        body
    }

    /// `GET /auth` for `name`; returns the `result` flag.
    pub async fn verify(&self, name: &str, token: &str) -> bool {
        let uri = format!("/auth?name={name}&token={token}");
        let (status, body) = self.call(Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK, "verify failed: {body}");
        body["result"].as_bool().expect("result flag")
    }
}

impl Drop for TestService {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
    }
}

/// Poll `condition` until it holds, failing the test after a timeout.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let outcome = tokio::time::timeout(SETTLE_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(outcome.is_ok(), "condition not reached within {SETTLE_TIMEOUT:?}");
}

/// HS256 rule with an updater. `secret` seeds both keys.
pub fn hs256_rule(name: &str, secret: &str) -> Value {
    json!({
        "name": name,
        "authorizer": {
            "type": "JWT_HS256",
            "config": {"expires": 3600, "secret": format!("{secret}-access")}
        },
        "updater": {
            "type": "JWT_HS256",
            "config": {"expires": 86400, "secret": format!("{secret}-refresh")}
        }
    })
}

/// HS256 rule without an updater.
pub fn access_only_rule(name: &str) -> Value {
    json!({
        "name": name,
        "authorizer": {
            "type": "JWT_HS256",
            "config": "{\"expires\":60,\"secret\":\"only\"}"
        }
    })
}

/// Rule names travel base64url encoded in `/rule/{name}`.
pub fn rule_path(name: &str) -> String {
    format!("/rule/{}", crate::rule::encode_rule_name(name))
}
