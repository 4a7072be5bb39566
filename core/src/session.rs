//! Session lifecycle: login handshake, default headers, keep-alive, logout.
//!
//! # Design
//! A `Session` owns everything a logged-in client needs: the API domain, the
//! default `Authorization`/`Cookie` headers, its lifecycle state and the
//! handle of its keep-alive thread. Nothing is process-global, so several
//! sessions against different platforms never interfere.
//!
//! Default headers are stored as `RwLock<Arc<DefaultHeaders>>`. Requests clone
//! the `Arc` once and apply that snapshot; the keep-alive thread swaps in a
//! complete replacement. A request therefore sees either the previous or the
//! new header set, never a mix.
//!
//! The handshake is split the same way the rest of the crate is: pure
//! `build_*` / `parse_*` functions describe each step, and
//! [`SessionManager::authenticate`] strings them together over the transport.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use base64::Engine;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ClientConfig, KeepAliveStrategy};
use crate::error::{ApiError, Result, TransportError};
use crate::hal::HalDocument;
use crate::http::{HttpRequest, HttpResponse, Transport};
use crate::keepalive::KeepAliveHandle;

const HAL_JSON: &str = "application/hal+json";
const JSON: &str = "application/json";

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Active,
    LoggingOut,
    Closed,
}

/// Headers attached to every request sent through a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultHeaders {
    pub authorization: Option<String>,
    pub cookie: Option<String>,
}

/// Which identity provider a login should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSelector {
    /// Required `kind` of the provider; `None` accepts any kind.
    pub kind: Option<String>,
    /// Link relation of the provider's login endpoint.
    pub login_relation: String,
}

impl ProviderSelector {
    pub fn new(kind: Option<&str>, login_relation: &str) -> Self {
        Self {
            kind: kind.map(str::to_string),
            login_relation: login_relation.to_string(),
        }
    }

    /// Any provider exposing the default resource-owner-password endpoint.
    pub fn ropc_default() -> Self {
        Self::new(None, "auth:ropc-default")
    }

    /// The credential-based MC|UX provider.
    pub fn mcux() -> Self {
        Self::new(Some("mcux"), "auth-mcux:login")
    }

    fn matches(&self, provider: &HalDocument) -> bool {
        self.kind
            .as_deref()
            .map_or(true, |kind| provider.str_field(&["kind"]) == Some(kind))
    }
}

#[derive(Clone)]
enum Grant {
    ClientCredentials { basic_token: String },
    Password { username: String, password: String },
}

/// Login material plus the identity provider it is meant for.
#[derive(Clone)]
pub struct Credentials {
    grant: Grant,
    selector: ProviderSelector,
}

impl Credentials {
    /// Client-credentials grant from an already base64-encoded
    /// `client_id:secret` string.
    pub fn basic(token: impl Into<String>) -> Self {
        Self {
            grant: Grant::ClientCredentials { basic_token: token.into() },
            selector: ProviderSelector::ropc_default(),
        }
    }

    pub fn client_credentials(client_id: &str, client_secret: &str) -> Self {
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{client_id}:{client_secret}"));
        Self::basic(token)
    }

    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            grant: Grant::Password {
                username: username.into(),
                password: password.into(),
            },
            selector: ProviderSelector::mcux(),
        }
    }

    pub fn with_selector(mut self, selector: ProviderSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn selector(&self) -> &ProviderSelector {
        &self.selector
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let grant = match &self.grant {
            Grant::ClientCredentials { .. } => "client_credentials".to_string(),
            Grant::Password { username, .. } => format!("password({username})"),
        };
        f.debug_struct("Credentials")
            .field("grant", &grant)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Handshake steps
// ---------------------------------------------------------------------------

pub fn build_auth_root(config: &ClientConfig, api_domain: &str) -> HttpRequest {
    HttpRequest::get(config.url(api_domain, "/auth")).with_header("accept", JSON)
}

pub fn parse_identity_providers_href(auth_root: &HalDocument) -> Result<String> {
    Ok(auth_root.require_link("auth:identity-providers")?.href)
}

/// Pick the login href of the first provider accepted by `selector`.
pub fn select_login_href(providers: &HalDocument, selector: &ProviderSelector) -> Result<String> {
    providers
        .embedded("auth:identity-provider")
        .iter()
        .filter(|provider| selector.matches(provider))
        .find_map(|provider| provider.link(&selector.login_relation))
        .map(|link| link.href)
        .ok_or_else(|| {
            ApiError::Authentication(format!(
                "no identity provider{} offers `{}`",
                selector.kind.as_deref().map(|k| format!(" of kind `{k}`")).unwrap_or_default(),
                selector.login_relation
            ))
        })
}

pub fn build_login(login_href: &str, credentials: &Credentials) -> Result<HttpRequest> {
    let request = HttpRequest::post(login_href).with_header("accept", JSON);
    match &credentials.grant {
        Grant::ClientCredentials { basic_token } => {
            let form = serde_urlencoded::to_string([("grant_type", "client_credentials"), ("scope", "openid")])
                .map_err(|e| ApiError::Serialization(e.to_string()))?;
            Ok(request
                .with_header("authorization", format!("Basic {basic_token}"))
                .with_body("application/x-www-form-urlencoded", form))
        }
        Grant::Password { username, password } => {
            let body = serde_json::json!({ "username": username, "password": password });
            Ok(request.with_body(JSON, body.to_string()))
        }
    }
}

#[derive(Deserialize)]
struct LoginToken {
    access_token: Option<String>,
    id_token: Option<String>,
}

/// Turn a login response into the session's default headers.
///
/// 200 and 303 both mean success. An OpenID Connect `id_token` wins over the
/// plain `access_token`; credential-based providers answer with cookies only.
pub fn parse_login(url: &str, response: &HttpResponse) -> Result<DefaultHeaders> {
    match response.status {
        200 | 303 => {}
        401 | 403 => {
            return Err(ApiError::Authentication(format!(
                "login rejected with HTTP {}",
                response.status
            )))
        }
        status => {
            return Err(TransportError::Status {
                url: url.to_string(),
                status,
                body: response.body.clone(),
            }
            .into())
        }
    }

    let token = serde_json::from_str::<LoginToken>(&response.body)
        .ok()
        .and_then(|t| t.id_token.or(t.access_token))
        .filter(|t| !t.is_empty());
    let cookie = cookie_header(response);

    if token.is_none() && cookie.is_none() {
        return Err(ApiError::Authentication(
            "login response carried neither a token nor session cookies".to_string(),
        ));
    }
    Ok(DefaultHeaders {
        authorization: token.map(|t| format!("Bearer {t}")),
        cookie,
    })
}

/// Collapse `set-cookie` headers into one `Cookie` request header value.
fn cookie_header(response: &HttpResponse) -> Option<String> {
    let pairs: Vec<&str> = response
        .header_values("set-cookie")
        .filter_map(|value| value.split(';').next())
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .collect();
    (!pairs.is_empty()).then(|| pairs.join("; "))
}

fn expect_success(url: &str, response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }
    Err(TransportError::Status {
        url: url.to_string(),
        status: response.status,
        body: response.body,
    }
    .into())
}

// ---------------------------------------------------------------------------
// Shared session state
// ---------------------------------------------------------------------------

/// The part of a session shared with its keep-alive thread.
pub(crate) struct SessionCore {
    pub(crate) id: Uuid,
    pub(crate) api_domain: String,
    pub(crate) config: ClientConfig,
    transport: Arc<dyn Transport>,
    headers: RwLock<Arc<DefaultHeaders>>,
    state: Mutex<SessionState>,
}

impl SessionCore {
    fn new(transport: Arc<dyn Transport>, config: ClientConfig, api_domain: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            api_domain: api_domain.to_string(),
            config,
            transport,
            headers: RwLock::new(Arc::new(DefaultHeaders::default())),
            state: Mutex::new(SessionState::Unauthenticated),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(session_id = %self.id, from = ?*state, to = ?next, "session state change");
        *state = next;
    }

    pub(crate) fn headers(&self) -> Arc<DefaultHeaders> {
        Arc::clone(&self.headers.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn update_headers(&self, update: impl FnOnce(&DefaultHeaders) -> DefaultHeaders) {
        let mut guard = self.headers.write().unwrap_or_else(PoisonError::into_inner);
        let next = update(&guard);
        *guard = Arc::new(next);
    }

    /// Final state: default headers dropped, nothing else will be sent.
    pub(crate) fn close(&self) {
        self.update_headers(|_| DefaultHeaders::default());
        self.set_state(SessionState::Closed);
    }

    pub(crate) fn send(&self, mut request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let headers = self.headers();
        if let Some(authorization) = &headers.authorization {
            if !request.has_header("authorization") {
                request.headers.push(("authorization".to_string(), authorization.clone()));
            }
        }
        if let Some(cookie) = &headers.cookie {
            if !request.has_header("cookie") {
                request.headers.push(("cookie".to_string(), cookie.clone()));
            }
        }
        if request.timeout.is_none() {
            request.timeout = Some(self.config.request_timeout());
        }
        let method = request.method;
        let url = request.url.clone();
        let response = self.transport.execute(request)?;
        debug!(session_id = %self.id, method = method.as_str(), url = %url, status = response.status, "request complete");
        Ok(response)
    }

    pub(crate) fn fetch_document(&self, url: &str) -> Result<HalDocument> {
        let response = self.send(HttpRequest::get(url).with_header("accept", HAL_JSON))?;
        if !response.is_success() {
            return Err(ApiError::Fetch {
                url: url.to_string(),
                status: response.status,
                body: response.body,
            });
        }
        HalDocument::parse(&response.body)
    }

    /// GET one handshake resource; any non-success status is a transport error.
    fn get_step(&self, url: &str) -> Result<HalDocument> {
        let response = self.send(HttpRequest::get(url).with_header("accept", JSON))?;
        let response = expect_success(url, response)?;
        HalDocument::parse(&response.body)
    }

    fn current_token(&self) -> Result<HalDocument> {
        let auth_root = self.get_step(&self.config.url(&self.api_domain, "/auth"))?;
        let link = auth_root
            .named_link("auth:token", "current")
            .or_else(|| auth_root.link("auth:token"))
            .ok_or_else(|| ApiError::Protocol("auth root exposes no `auth:token` link".to_string()))?;
        self.get_step(&link.href)
    }

    pub(crate) fn keep_alive_tick(&self) -> Result<()> {
        match self.config.keep_alive_strategy {
            KeepAliveStrategy::ExtendToken => {
                let token = self.current_token()?;
                if let Some(access_token) = token.str_field(&["accessToken"]) {
                    let cookie = format!("avidAccessToken={access_token}");
                    self.update_headers(|current| DefaultHeaders {
                        authorization: current.authorization.clone(),
                        cookie: Some(cookie),
                    });
                }
                let extend = token.require_link("auth-token:extend")?;
                let response = self.send(HttpRequest::post(&extend.href).with_header("accept", JSON))?;
                expect_success(&extend.href, response)?;
                debug!(session_id = %self.id, "token extended");
            }
            KeepAliveStrategy::Ping => {
                let url = self.config.url(&self.api_domain, "/api/middleware/service/ping");
                let response = self.send(HttpRequest::get(&url).with_header("accept", JSON))?;
                expect_success(&url, response)?;
                debug!(session_id = %self.id, "ping acknowledged");
            }
        }
        Ok(())
    }

    pub(crate) fn revoke_token(&self) -> Result<()> {
        let token = self.current_token()?;
        let removal = token.require_link("auth-token:removal")?;
        let response = self.send(HttpRequest::delete(&removal.href).with_header("accept", JSON))?;
        if response.status != 204 {
            warn!(session_id = %self.id, status = response.status, "token removal did not answer 204");
        }
        expect_success(&removal.href, response)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Creates authenticated sessions over a host-supplied transport.
#[derive(Clone)]
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run the login handshake and start the keep-alive task.
    ///
    /// No session is returned on failure.
    pub fn authenticate(&self, api_domain: &str, credentials: &Credentials) -> Result<Session> {
        let core = Arc::new(SessionCore::new(Arc::clone(&self.transport), self.config.clone(), api_domain));
        core.set_state(SessionState::Authenticating);

        match self.login(&core, credentials) {
            Ok(headers) => {
                core.update_headers(|_| headers);
                core.set_state(SessionState::Active);
            }
            Err(err) => {
                warn!(session_id = %core.id, api_domain, error = %err, "authentication failed");
                core.close();
                return Err(err);
            }
        }

        let keep_alive = match KeepAliveHandle::spawn(Arc::clone(&core)) {
            Ok(handle) => handle,
            Err(err) => {
                core.close();
                return Err(ApiError::Authentication(format!("could not start keep-alive task: {err}")));
            }
        };
        info!(session_id = %core.id, api_domain, "session established");

        Ok(Session {
            core,
            keep_alive: Mutex::new(Some(keep_alive)),
        })
    }

    fn login(&self, core: &SessionCore, credentials: &Credentials) -> Result<DefaultHeaders> {
        let auth_root_request = build_auth_root(&self.config, &core.api_domain);
        let auth_root_url = auth_root_request.url.clone();
        let response = expect_success(&auth_root_url, core.send(auth_root_request)?)?;
        let providers_href = parse_identity_providers_href(&HalDocument::parse(&response.body)?)?;

        let providers = core.get_step(&providers_href)?;
        let login_href = select_login_href(&providers, &credentials.selector)?;
        debug!(session_id = %core.id, login_href = %login_href, "identity provider selected");

        let response = core.send(build_login(&login_href, credentials)?)?;
        parse_login(&login_href, &response)
    }
}

/// An authenticated connection to one platform.
///
/// Dropping a session stops its keep-alive task but does not revoke the
/// token; call [`logout`](Self::logout) for that.
pub struct Session {
    core: Arc<SessionCore>,
    keep_alive: Mutex<Option<KeepAliveHandle>>,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn api_domain(&self) -> &str {
        &self.core.api_domain
    }

    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }

    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    /// Snapshot of the headers currently attached to outgoing requests.
    pub fn default_headers(&self) -> Arc<DefaultHeaders> {
        self.core.headers()
    }

    /// `{scheme}://{api_domain}{path}` for this session's platform.
    pub fn url(&self, path: &str) -> String {
        self.core.config.url(&self.core.api_domain, path)
    }

    /// Execute a request with the default headers applied. Headers already
    /// present on `request` take precedence.
    pub fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        Ok(self.core.send(request)?)
    }

    /// GET a hypermedia document; a non-success status becomes
    /// [`ApiError::Fetch`].
    pub fn fetch_document(&self, url: &str) -> Result<HalDocument> {
        self.core.fetch_document(url)
    }

    /// Run one keep-alive round immediately.
    pub fn keep_alive(&self) -> Result<()> {
        match self.state() {
            SessionState::Active => self.core.keep_alive_tick(),
            state => Err(ApiError::InactiveSession(state)),
        }
    }

    /// Stop the keep-alive task, then revoke the current token.
    ///
    /// Calling this on a closed session is a no-op. The session ends up
    /// closed even when revocation fails; the failure is returned.
    pub fn logout(&self) -> Result<()> {
        self.stop_keep_alive();

        {
            let mut state = self.core.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == SessionState::Closed {
                debug!(session_id = %self.core.id, "logout on closed session ignored");
                return Ok(());
            }
            *state = SessionState::LoggingOut;
        }

        let result = self.core.revoke_token();
        self.core.close();
        match &result {
            Ok(()) => info!(session_id = %self.core.id, "logged out"),
            Err(err) => warn!(session_id = %self.core.id, error = %err, "token revocation failed during logout"),
        }
        result
    }

    fn stop_keep_alive(&self) {
        let handle = self
            .keep_alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.cancel();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_keep_alive();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.core.id)
            .field("api_domain", &self.core.api_domain)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;

    fn providers() -> HalDocument {
        HalDocument::parse(
            r#"{"_embedded": {"auth:identity-provider": [
                {"kind": "oauth", "_links": {"auth:ropc-default": [{"href": "https://p/auth/ropc"}]}},
                {"kind": "mcux", "_links": {"auth-mcux:login": [{"href": "https://p/auth/mcux/login"}]}}
            ]}}"#,
        )
        .unwrap()
    }

    #[test]
    fn auth_root_request_targets_the_domain() {
        let req = build_auth_root(&ClientConfig::default(), "platform.example");
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "https://platform.example/auth");
        assert_eq!(req.header("accept"), Some("application/json"));
    }

    #[test]
    fn identity_providers_href_comes_from_the_first_link() {
        let doc = HalDocument::parse(
            r#"{"_links": {"auth:identity-providers": [{"href": "https://p/a"}, {"href": "https://p/b"}]}}"#,
        )
        .unwrap();
        assert_eq!(parse_identity_providers_href(&doc).unwrap(), "https://p/a");
        assert!(matches!(
            parse_identity_providers_href(&HalDocument::default()),
            Err(ApiError::Protocol(_))
        ));
    }

    #[test]
    fn selects_ropc_default_of_any_kind() {
        let href = select_login_href(&providers(), &ProviderSelector::ropc_default()).unwrap();
        assert_eq!(href, "https://p/auth/ropc");
    }

    #[test]
    fn selects_by_kind() {
        let href = select_login_href(&providers(), &ProviderSelector::mcux()).unwrap();
        assert_eq!(href, "https://p/auth/mcux/login");
    }

    #[test]
    fn missing_provider_is_an_authentication_error() {
        let selector = ProviderSelector::new(Some("ldap"), "auth-oauth:ropc-ldap");
        let err = select_login_href(&providers(), &selector).unwrap_err();
        assert!(matches!(err, ApiError::Authentication(_)));
        assert!(err.to_string().contains("ldap"));
    }

    #[test]
    fn client_credentials_login_is_a_basic_auth_form_post() {
        let creds = Credentials::client_credentials("app", "s3cret");
        let req = build_login("https://p/auth/ropc", &creds).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.header("authorization"), Some("Basic YXBwOnMzY3JldA=="));
        assert_eq!(req.header("content-type"), Some("application/x-www-form-urlencoded"));
        assert_eq!(req.body.as_deref(), Some("grant_type=client_credentials&scope=openid"));
    }

    #[test]
    fn password_login_is_a_json_post() {
        let creds = Credentials::password("alice", "pw\"1");
        let req = build_login("https://p/auth/mcux/login", &creds).unwrap();
        let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["username"], "alice");
        assert_eq!(body["password"], "pw\"1");
        assert!(!req.has_header("authorization"));
    }

    #[test]
    fn id_token_wins_over_access_token() {
        let resp = HttpResponse::new(200, r#"{"access_token": "acc", "id_token": "oidc", "expires_in": 3600}"#);
        let headers = parse_login("https://p/login", &resp).unwrap();
        assert_eq!(headers.authorization.as_deref(), Some("Bearer oidc"));
        assert!(headers.cookie.is_none());
    }

    #[test]
    fn access_token_is_used_without_openid() {
        let resp = HttpResponse::new(303, r#"{"access_token": "acc"}"#);
        let headers = parse_login("https://p/login", &resp).unwrap();
        assert_eq!(headers.authorization.as_deref(), Some("Bearer acc"));
    }

    #[test]
    fn cookie_login_collects_set_cookie_pairs() {
        let mut resp = HttpResponse::new(303, "");
        resp.headers.push(("Set-Cookie".to_string(), "avidAccessToken=t1; Path=/; HttpOnly".to_string()));
        resp.headers.push(("Set-Cookie".to_string(), "route=a".to_string()));
        let headers = parse_login("https://p/login", &resp).unwrap();
        assert!(headers.authorization.is_none());
        assert_eq!(headers.cookie.as_deref(), Some("avidAccessToken=t1; route=a"));
    }

    #[test]
    fn rejected_login_is_an_authentication_error() {
        let resp = HttpResponse::new(401, "bad credentials");
        assert!(matches!(parse_login("https://p/login", &resp), Err(ApiError::Authentication(_))));
    }

    #[test]
    fn failing_login_endpoint_is_a_transport_error() {
        let resp = HttpResponse::new(500, "boom");
        let err = parse_login("https://p/login", &resp).unwrap_err();
        assert!(matches!(err, ApiError::Transport(TransportError::Status { status: 500, .. })));
    }

    #[test]
    fn login_without_token_or_cookie_fails() {
        let resp = HttpResponse::new(200, r#"{"token_type": "bearer"}"#);
        assert!(matches!(parse_login("https://p/login", &resp), Err(ApiError::Authentication(_))));
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let rendered = format!("{:?}", Credentials::password("alice", "hunter2"));
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
        let rendered = format!("{:?}", Credentials::basic("c2VjcmV0"));
        assert!(!rendered.contains("c2VjcmV0"));
    }
}
