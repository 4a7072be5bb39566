//! In-memory platform used by the integration tests.
//!
//! Routes are matched on method + exact URL. Every request is recorded with
//! the headers the session attached, so tests can assert on ordering and on
//! header propagation.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use platform_core::{
    ClientConfig, Credentials, HttpMethod, HttpRequest, HttpResponse, Session, SessionManager, Transport,
    TransportError,
};
use serde_json::{json, Value};

pub const DOMAIN: &str = "p";
pub const AUTH: &str = "https://p/auth";
pub const PROVIDERS: &str = "https://p/auth/identity-providers";
pub const ROPC_LOGIN: &str = "https://p/auth/ropc";
pub const MCUX_LOGIN: &str = "https://p/auth/mcux/login";
pub const CURRENT_TOKEN: &str = "https://p/auth/tokens/current";
pub const EXTEND: &str = "https://p/auth/tokens/current/extend";
pub const REMOVAL: &str = "https://p/auth/tokens/current/removal";
pub const PING: &str = "https://p/api/middleware/service/ping";
pub const REGISTRY: &str = "https://p/apis/avid.ctms.registry;version=0/serviceroots";

type Handler = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: HttpMethod,
    pub url: String,
    pub authorization: Option<String>,
    pub cookie: Option<String>,
    pub body: Option<String>,
}

#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<Vec<(HttpMethod, String, Arc<Handler>)>>,
    log: Mutex<Vec<Recorded>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Later registrations for the same method + URL replace earlier ones.
    pub fn route(
        &self,
        method: HttpMethod,
        url: &str,
        handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    ) {
        self.register(method, url, move |request| Ok(handler(request)));
    }

    /// The endpoint never answers: every call is a network error.
    pub fn fail(&self, method: HttpMethod, url: &str) {
        self.register(method, url, |request| {
            Err(TransportError::Network {
                url: request.url.clone(),
                message: "connection timed out".to_string(),
            })
        });
    }

    fn register(
        &self,
        method: HttpMethod,
        url: &str,
        handler: impl Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    ) {
        let mut routes = self.routes.lock().unwrap();
        routes.retain(|(m, u, _)| !(*m == method && u == url));
        routes.push((method, url.to_string(), Arc::new(Box::new(handler))));
    }

    pub fn json(&self, method: HttpMethod, url: &str, status: u16, body: Value) {
        let body = body.to_string();
        self.route(method, url, move |_| HttpResponse::new(status, body.clone()));
    }

    pub fn status(&self, method: HttpMethod, url: &str, status: u16) {
        self.route(method, url, move |_| HttpResponse::new(status, ""));
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, method: HttpMethod, url: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }
}

impl Transport for FakeTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.log.lock().unwrap().push(Recorded {
            method: request.method,
            url: request.url.clone(),
            authorization: request.header("authorization").map(str::to_string),
            cookie: request.header("cookie").map(str::to_string),
            body: request.body.clone(),
        });
        let handler = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .find(|(m, u, _)| *m == request.method && *u == request.url)
            .map(|(_, _, h)| Arc::clone(h));
        match handler {
            Some(handler) => handler(&request),
            None => Ok(HttpResponse::new(404, format!("no route for {} {}", request.method.as_str(), request.url))),
        }
    }
}

/// Auth root, identity providers, client-credentials and password logins,
/// and a current token that can be extended and removed.
pub fn install_auth(fake: &FakeTransport) {
    fake.json(
        HttpMethod::Get,
        AUTH,
        200,
        json!({"_links": {
            "auth:identity-providers": [{"href": PROVIDERS}],
            "auth:token": [{"href": "https://p/auth/tokens/other", "name": "other"}, {"href": CURRENT_TOKEN, "name": "current"}]
        }}),
    );
    fake.json(
        HttpMethod::Get,
        PROVIDERS,
        200,
        json!({"_embedded": {"auth:identity-provider": [
            {"kind": "oauth", "_links": {"auth:ropc-default": [{"href": ROPC_LOGIN}]}},
            {"kind": "mcux", "_links": {"auth-mcux:login": [{"href": MCUX_LOGIN}]}}
        ]}}),
    );
    fake.json(HttpMethod::Post, ROPC_LOGIN, 200, json!({"access_token": "t0", "expires_in": 3600}));
    fake.route(HttpMethod::Post, MCUX_LOGIN, |_| {
        let mut response = HttpResponse::new(303, "");
        response
            .headers
            .push(("set-cookie".to_string(), "avidAccessToken=c0; Path=/; Secure".to_string()));
        response
    });
    fake.json(HttpMethod::Get, CURRENT_TOKEN, 200, current_token("t0"));
    fake.status(HttpMethod::Post, EXTEND, 204);
    fake.status(HttpMethod::Delete, REMOVAL, 204);
}

pub fn current_token(access_token: &str) -> Value {
    json!({
        "accessToken": access_token,
        "_links": {
            "auth-token:extend": [{"href": EXTEND}],
            "auth-token:removal": [{"href": REMOVAL}]
        }
    })
}

/// Serve a fresh access token on every current-token read and remember it.
pub fn rotate_tokens(fake: &FakeTransport) -> Arc<Mutex<Vec<String>>> {
    let issued = Arc::new(Mutex::new(Vec::new()));
    let counter = AtomicUsize::new(1);
    let log = Arc::clone(&issued);
    fake.route(HttpMethod::Get, CURRENT_TOKEN, move |_| {
        let token = format!("t{}", counter.fetch_add(1, Ordering::SeqCst));
        log.lock().unwrap().push(token.clone());
        HttpResponse::new(200, current_token(&token).to_string())
    });
    issued
}

/// Keep-alive effectively disabled unless a test asks for it.
pub fn config() -> ClientConfig {
    ClientConfig {
        keep_alive_interval_ms: 60_000,
        ..ClientConfig::default()
    }
}

pub fn manager(fake: &Arc<FakeTransport>, config: ClientConfig) -> SessionManager {
    let transport: Arc<dyn Transport> = fake.clone();
    SessionManager::new(transport, config)
}

pub fn login(fake: &Arc<FakeTransport>) -> Session {
    install_auth(fake);
    manager(fake, config())
        .authenticate(DOMAIN, &Credentials::basic("Y2xpZW50OnNlY3JldA=="))
        .unwrap()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
