//! Shared fixtures: an in-memory backend reachable over both transport
//! styles, recording hooks and a layer wired to a manual clock.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use guard_console::SecurityLayer;
use guard_core::{GuardConfig, ManualClock, MemoryStore, PageMeta};
use guard_security::AuthCredential;
use guard_session::SessionHooks;
use guard_transport::{
    CallbackTransport, Completion, InboundResponse, OutboundRequest, Transport, TransportError,
};
use http::StatusCode;

/// 2023-11-14T22:13:20Z
pub const START_MS: u64 = 1_700_000_000_000;

pub const PERMISSIONS: &str = "/api/user/permissions";
pub const EVENTS: &str = "/api/security/events";

/// Counterpart answering from a route table. Unknown paths get `200 {}`.
#[derive(Default)]
pub struct Backend {
    routes: Mutex<HashMap<String, (StatusCode, String)>>,
    delay: Mutex<Option<Duration>>,
    seen: Mutex<Vec<OutboundRequest>>,
}

impl Backend {
    pub fn new() -> Arc<Self> {
        let backend = Arc::new(Self::default());
        backend.route(PERMISSIONS, StatusCode::OK, "[]");
        backend
    }

    pub fn route(&self, path: &str, status: StatusCode, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_string()));
    }

    pub fn grant(&self, capabilities: &[&str]) {
        let body = serde_json::to_string(capabilities).unwrap();
        self.route(PERMISSIONS, StatusCode::OK, &body);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<OutboundRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path().unwrap() == path)
            .collect()
    }

    fn respond(&self, request: OutboundRequest) -> InboundResponse {
        let path = request.path().unwrap();
        self.seen.lock().unwrap().push(request);
        match self.routes.lock().unwrap().get(&path) {
            Some((status, body)) => InboundResponse::new(*status).with_body(body.as_bytes()),
            None => InboundResponse::ok().with_body("{}"),
        }
    }
}

#[async_trait]
impl Transport for Backend {
    async fn send(&self, request: OutboundRequest) -> Result<InboundResponse, TransportError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.respond(request))
    }
}

/// The same backend behind a completion callback.
pub struct CallbackBackend(pub Arc<Backend>);

impl CallbackTransport for CallbackBackend {
    fn send_with_callback(&self, request: OutboundRequest, done: Completion) {
        done(Ok(self.0.respond(request)));
    }
}

#[derive(Default)]
pub struct RecordingHooks {
    pub notices: Mutex<Vec<String>>,
    pub redirects: Mutex<Vec<String>>,
}

impl SessionHooks for RecordingHooks {
    fn notify(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }

    fn redirect(&self, location: &str) {
        self.redirects.lock().unwrap().push(location.to_string());
    }
}

pub struct Harness {
    pub layer: SecurityLayer,
    pub clock: ManualClock,
    pub backend: Arc<Backend>,
    pub durable: Arc<MemoryStore>,
    pub volatile: Arc<MemoryStore>,
    pub meta: Arc<PageMeta>,
    pub hooks: Arc<RecordingHooks>,
}

pub fn harness() -> Harness {
    harness_with(GuardConfig::default())
}

pub fn harness_with(config: GuardConfig) -> Harness {
    let clock = ManualClock::new(START_MS);
    let backend = Backend::new();
    let durable = Arc::new(MemoryStore::new());
    let volatile = Arc::new(MemoryStore::new());
    let meta = Arc::new(PageMeta::new());
    let hooks = Arc::new(RecordingHooks::default());

    let layer = SecurityLayer::builder(config)
        .clock(Arc::new(clock.clone()))
        .stores(durable.clone(), volatile.clone())
        .meta(meta.clone())
        .hooks(hooks.clone())
        .transport(backend.clone())
        .build()
        .unwrap();

    Harness {
        layer,
        clock,
        backend,
        durable,
        volatile,
        meta,
        hooks,
    }
}

/// Unsigned JWT-shaped credential expiring at `exp` (seconds).
pub fn credential(exp: u64) -> AuthCredential {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp},"sub":"ops-admin"}}"#));
    AuthCredential::new(format!("{header}.{payload}.c2lnbmF0dXJl"))
}

/// Credential valid for a day after the harness start.
pub fn day_credential() -> AuthCredential {
    credential(START_MS / 1000 + 86_400)
}
