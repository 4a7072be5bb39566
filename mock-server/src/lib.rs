//! In-process emulator of a hypermedia media platform.
//!
//! Serves just enough of the platform for end-to-end tests of the client
//! core: the auth handshake with two identity providers, token extension and
//! removal, the service registry, a paged simple search and a location tree
//! whose folders list their children a few items per page.
//!
//! Every href is built from the request's `Host` header, so the emulator
//! works on whatever port it is bound to.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CLIENT_ID: &str = "integration";
pub const CLIENT_SECRET: &str = "s3cret";
/// base64 of `CLIENT_ID:CLIENT_SECRET`.
const CLIENT_BASIC: &str = "aW50ZWdyYXRpb246czNjcmV0";
pub const USERNAME: &str = "editor";
pub const PASSWORD: &str = "pw";

/// Path segment of the service registry.
pub const REGISTRY: &str = "avid.ctms.registry;version=0";
/// Path segment of the asset management service.
pub const SERVICE: &str = "avid.pam;version=0;realm=global";
pub const ROOT_ID: &str = "root";

const PAGE_SIZE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Folder,
    Asset,
}

#[derive(Debug, Clone)]
pub struct Item {
    pub id: String,
    pub parent: Option<String>,
    pub name: String,
    pub kind: ItemKind,
    pub comment: Option<String>,
    pub attributes: Vec<(String, String)>,
}

impl Item {
    fn folder(id: &str, parent: Option<&str>, name: &str) -> Self {
        Self {
            id: id.to_string(),
            parent: parent.map(str::to_string),
            name: name.to_string(),
            kind: ItemKind::Folder,
            comment: None,
            attributes: Vec::new(),
        }
    }

    fn asset(id: &str, parent: &str, name: &str) -> Self {
        Self {
            kind: ItemKind::Asset,
            ..Self::folder(id, Some(parent), name)
        }
    }

    fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.push((name.to_string(), value.to_string()));
        self
    }
}

/// Mutable platform state: live tokens plus a fixed location tree.
#[derive(Debug)]
pub struct Platform {
    tokens: HashSet<String>,
    extensions: u64,
    items: Vec<Item>,
}

pub type Db = Arc<RwLock<Platform>>;

impl Platform {
    /// ```text
    /// Projects
    /// ├── Promo
    /// │   ├── promo-cut.mxf
    /// │   └── Archive
    /// │       └── old-cut.mxf
    /// ├── intro.mxf
    /// ├── News
    /// │   ├── sunset-beach.mxf
    /// │   ├── sunrise.mxf
    /// │   └── headline.mxf
    /// └── outro.mxf
    /// ```
    pub fn sample() -> Self {
        let items = vec![
            Item::folder(ROOT_ID, None, "Projects"),
            Item::folder("promo", Some(ROOT_ID), "Promo"),
            Item::asset("intro", ROOT_ID, "intro.mxf").with_comment("opening titles"),
            Item::folder("news", Some(ROOT_ID), "News"),
            Item::asset("outro", ROOT_ID, "outro.mxf"),
            Item::asset("promo-cut", "promo", "promo-cut.mxf").with_attribute("Rating", "4"),
            Item::folder("archive", Some("promo"), "Archive"),
            Item::asset("old-cut", "archive", "old-cut.mxf"),
            Item::asset("sunset", "news", "sunset-beach.mxf")
                .with_comment("golden hour")
                .with_attribute("Status", "approved"),
            Item::asset("sunrise", "news", "sunrise.mxf"),
            Item::asset("headline", "news", "headline.mxf"),
        ];
        Self {
            tokens: HashSet::new(),
            extensions: 0,
            items,
        }
    }

    pub fn shared() -> Db {
        Arc::new(RwLock::new(Self::sample()))
    }

    pub fn live_tokens(&self) -> usize {
        self.tokens.len()
    }

    /// Number of successful token extensions so far.
    pub fn extensions(&self) -> u64 {
        self.extensions
    }

    fn issue_token(&mut self) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.tokens.insert(token.clone());
        token
    }

    fn item(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    fn children(&self, id: &str) -> Vec<&Item> {
        self.items
            .iter()
            .filter(|item| item.parent.as_deref() == Some(id))
            .collect()
    }

    fn search(&self, text: &str) -> Vec<&Item> {
        let text = text.to_lowercase();
        self.items
            .iter()
            .filter(|item| item.kind == ItemKind::Asset && item.name.to_lowercase().contains(&text))
            .collect()
    }
}

pub fn router(db: Db) -> Router {
    Router::new()
        .route("/auth", get(auth_root))
        .route("/auth/identity-providers", get(identity_providers))
        .route("/auth/oauth2/token", post(oauth_token))
        .route("/auth/mcux/login", post(mcux_login))
        .route("/auth/tokens/current", get(current_token))
        .route("/auth/tokens/current/extend", post(extend_token))
        .route("/auth/tokens/current/removal", delete(remove_token))
        .route("/api/middleware/service/ping", get(ping))
        .route("/apis/{service}/serviceroots", get(service_roots))
        .route("/apis/{service}/searches/simple", get(simple_search))
        .route("/apis/{service}/locations", get(locations))
        .route("/apis/{service}/locations/items/{id}", get(location_item))
        .route("/apis/{service}/locations/items/{id}/children", get(location_children))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    serve(listener, Platform::shared()).await
}

/// Serve over caller-owned state, so tests can inspect it afterwards.
pub async fn serve(listener: TcpListener, db: Db) -> Result<(), std::io::Error> {
    axum::serve(listener, router(db)).await
}

// --- request helpers ---

fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}

/// Bearer token, or the `avidAccessToken` cookie.
fn presented_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .map(str::trim)
                .find_map(|pair| pair.strip_prefix("avidAccessToken="))
        })
        .map(str::to_string)
}

async fn authorize(db: &Db, headers: &HeaderMap) -> Result<String, StatusCode> {
    let token = presented_token(headers).ok_or(StatusCode::UNAUTHORIZED)?;
    if db.read().await.tokens.contains(&token) {
        Ok(token)
    } else {
        warn!("request with unknown or revoked token");
        Err(StatusCode::UNAUTHORIZED)
    }
}

fn require_service(service: &str) -> Result<(), StatusCode> {
    if service == SERVICE {
        Ok(())
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

// --- auth ---

async fn auth_root(headers: HeaderMap) -> Json<Value> {
    let base = base_url(&headers);
    Json(json!({
        "_links": {
            "auth:identity-providers": [{"href": format!("{base}/auth/identity-providers")}],
            "auth:token": [
                {"href": format!("{base}/auth/tokens"), "name": "all"},
                {"href": format!("{base}/auth/tokens/current"), "name": "current"}
            ]
        }
    }))
}

async fn identity_providers(headers: HeaderMap) -> Json<Value> {
    let base = base_url(&headers);
    Json(json!({
        "_embedded": {
            "auth:identity-provider": [
                {
                    "kind": "oauth",
                    "_links": {"auth:ropc-default": [{"href": format!("{base}/auth/oauth2/token")}]}
                },
                {
                    "kind": "mcux",
                    "_links": {"auth-mcux:login": [{"href": format!("{base}/auth/mcux/login")}]}
                }
            ]
        }
    }))
}

#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub grant_type: String,
    #[serde(default)]
    pub scope: Option<String>,
}

async fn oauth_token(
    State(db): State<Db>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> Result<Json<Value>, StatusCode> {
    let expected = format!("Basic {CLIENT_BASIC}");
    let authorization = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    if form.grant_type != "client_credentials" || authorization != Some(expected.as_str()) {
        warn!(grant_type = %form.grant_type, "client credentials rejected");
        return Err(StatusCode::UNAUTHORIZED);
    }
    let token = db.write().await.issue_token();
    info!(scope = ?form.scope, "access token issued");
    Ok(Json(json!({"access_token": token, "token_type": "bearer", "expires_in": 3600})))
}

#[derive(Debug, Deserialize)]
pub struct PasswordLogin {
    pub username: String,
    pub password: String,
}

async fn mcux_login(State(db): State<Db>, Json(login): Json<PasswordLogin>) -> Result<Response, StatusCode> {
    if login.username != USERNAME || login.password != PASSWORD {
        warn!(username = %login.username, "password login rejected");
        return Err(StatusCode::UNAUTHORIZED);
    }
    let token = db.write().await.issue_token();
    info!(username = %login.username, "session cookie issued");
    let cookie = format!("avidAccessToken={token}; Path=/; HttpOnly");
    Ok(([(header::SET_COOKIE, cookie)], Json(json!({"state": "LoggedIn"}))).into_response())
}

async fn current_token(State(db): State<Db>, headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
    let token = authorize(&db, &headers).await?;
    let base = base_url(&headers);
    Ok(Json(json!({
        "accessToken": token,
        "expiresIn": 3600,
        "_links": {
            "self": {"href": format!("{base}/auth/tokens/current")},
            "auth-token:extend": [{"href": format!("{base}/auth/tokens/current/extend")}],
            "auth-token:removal": [{"href": format!("{base}/auth/tokens/current/removal")}]
        }
    })))
}

async fn extend_token(State(db): State<Db>, headers: HeaderMap) -> Result<StatusCode, StatusCode> {
    authorize(&db, &headers).await?;
    db.write().await.extensions += 1;
    debug!("token extended");
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_token(State(db): State<Db>, headers: HeaderMap) -> Result<StatusCode, StatusCode> {
    let token = authorize(&db, &headers).await?;
    db.write().await.tokens.remove(&token);
    info!("token revoked");
    Ok(StatusCode::NO_CONTENT)
}

async fn ping(State(db): State<Db>, headers: HeaderMap) -> Result<Json<Value>, StatusCode> {
    authorize(&db, &headers).await?;
    Ok(Json(json!({"status": "ok"})))
}

// --- registry ---

async fn service_roots(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(registry): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    authorize(&db, &headers).await?;
    if registry != REGISTRY {
        return Err(StatusCode::NOT_FOUND);
    }
    let base = base_url(&headers);
    let service = format!("{base}/apis/{SERVICE}");
    Ok(Json(json!({
        "resources": {
            "search:simple-search": [{
                "href": format!("{service}/searches/simple?search={{search}}{{&offset,limit}}"),
                "templated": true
            }],
            "loc:locations": [{"href": format!("{service}/locations")}]
        }
    })))
}

// --- search and locations ---

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

fn item_href(base: &str, id: &str) -> String {
    format!("{base}/apis/{SERVICE}/locations/items/{id}")
}

fn children_href(base: &str, id: &str, offset: usize, limit: usize) -> String {
    format!("{}/children?offset={offset}&limit={limit}", item_href(base, id))
}

fn item_json(base: &str, item: &Item) -> Value {
    let mut links = json!({"self": {"href": item_href(base, &item.id)}});
    if item.kind == ItemKind::Folder {
        links["loc:collection"] = json!({"href": children_href(base, &item.id, 0, PAGE_SIZE)});
    }
    let mut common = json!({"name": item.name});
    if let Some(comment) = &item.comment {
        common["comment"] = json!(comment);
    }
    let attributes: Vec<Value> = item
        .attributes
        .iter()
        .map(|(name, value)| json!({"name": name, "value": value}))
        .collect();
    let kind = match item.kind {
        ItemKind::Folder => "folder",
        ItemKind::Asset => "asset",
    };
    json!({
        "base": {"id": item.id, "type": kind},
        "common": common,
        "attributes": attributes,
        "_links": links
    })
}

/// One window of `items` as a HAL collection page under `relation`.
fn collection_page(
    base: &str,
    items: &[&Item],
    relation: &str,
    offset: usize,
    limit: usize,
    href: impl Fn(usize) -> String,
) -> Value {
    let limit = limit.max(1);
    let window: Vec<Value> = items
        .iter()
        .skip(offset)
        .take(limit)
        .map(|item| item_json(base, item))
        .collect();
    let mut links = json!({"self": {"href": href(offset)}});
    if offset + limit < items.len() {
        links["next"] = json!({"href": href(offset + limit)});
    }
    json!({"_links": links, "_embedded": {relation: window}})
}

async fn simple_search(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(service): Path<String>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, StatusCode> {
    authorize(&db, &headers).await?;
    require_service(&service)?;
    let base = base_url(&headers);
    let platform = db.read().await;
    let hits = platform.search(&query.search);
    let limit = query.limit.unwrap_or(PAGE_SIZE).max(1);
    debug!(search = %query.search, hits = hits.len(), offset = query.offset, "simple search");

    let href = |offset: usize| {
        let params = [
            ("search", query.search.clone()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ];
        let encoded = serde_urlencoded::to_string(params).unwrap_or_default();
        format!("{base}/apis/{SERVICE}/searches/simple?{encoded}")
    };
    Ok(Json(collection_page(&base, &hits, "aa:asset", query.offset, limit, href)))
}

async fn locations(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(service): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    authorize(&db, &headers).await?;
    require_service(&service)?;
    let base = base_url(&headers);
    Ok(Json(json!({
        "_links": {
            "self": {"href": format!("{base}/apis/{SERVICE}/locations")},
            "loc:root-item": {"href": item_href(&base, ROOT_ID)}
        }
    })))
}

async fn location_item(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((service, id)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    authorize(&db, &headers).await?;
    require_service(&service)?;
    let base = base_url(&headers);
    let platform = db.read().await;
    let item = platform.item(&id).ok_or(StatusCode::NOT_FOUND)?;

    let mut body = item_json(&base, item);
    if item.kind == ItemKind::Folder {
        let children = platform.children(&id);
        let first = collection_page(&base, &children, "loc:item", 0, PAGE_SIZE, |offset| {
            children_href(&base, &id, offset, PAGE_SIZE)
        });
        body["_embedded"] = json!({"loc:collection": first});
    }
    Ok(Json(body))
}

async fn location_children(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((service, id)): Path<(String, String)>,
    Query(paging): Query<Paging>,
) -> Result<Json<Value>, StatusCode> {
    authorize(&db, &headers).await?;
    require_service(&service)?;
    let base = base_url(&headers);
    let platform = db.read().await;
    let item = platform.item(&id).ok_or(StatusCode::NOT_FOUND)?;
    if item.kind != ItemKind::Folder {
        return Err(StatusCode::NOT_FOUND);
    }
    let limit = paging.limit.unwrap_or(PAGE_SIZE).max(1);
    let children = platform.children(&id);
    Ok(Json(collection_page(&base, &children, "loc:item", paging.offset, limit, |offset| {
        children_href(&base, &id, offset, limit)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "route=a; avidAccessToken=c1".parse().unwrap());
        assert_eq!(presented_token(&headers).as_deref(), Some("c1"));
        headers.insert(header::AUTHORIZATION, "Bearer b1".parse().unwrap());
        assert_eq!(presented_token(&headers).as_deref(), Some("b1"));
    }

    #[test]
    fn missing_token_is_none() {
        assert!(presented_token(&HeaderMap::new()).is_none());
    }

    #[test]
    fn search_matches_asset_names_only() {
        let platform = Platform::sample();
        let names: Vec<&str> = platform.search("SUN").iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["sunset-beach.mxf", "sunrise.mxf"]);
        assert!(platform.search("news").is_empty());
    }

    #[test]
    fn children_keep_listing_order() {
        let platform = Platform::sample();
        let ids: Vec<&str> = platform.children(ROOT_ID).iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["promo", "intro", "news", "outro"]);
    }

    #[test]
    fn collection_page_links_next_only_when_more_remain() {
        let platform = Platform::sample();
        let children = platform.children(ROOT_ID);
        let href = |offset: usize| format!("http://h/c?offset={offset}");
        let first = collection_page("http://h", &children, "loc:item", 0, 3, href);
        assert_eq!(first["_embedded"]["loc:item"].as_array().unwrap().len(), 3);
        assert_eq!(first["_links"]["next"]["href"], "http://h/c?offset=3");
        let last = collection_page("http://h", &children, "loc:item", 3, 3, href);
        assert_eq!(last["_embedded"]["loc:item"].as_array().unwrap().len(), 1);
        assert!(last["_links"].get("next").is_none());
    }

    #[test]
    fn folders_advertise_their_collection() {
        let platform = Platform::sample();
        let folder = item_json("http://h", platform.item("news").unwrap());
        assert_eq!(folder["base"]["type"], "folder");
        assert!(folder["_links"]["loc:collection"]["href"].as_str().unwrap().contains("/news/children"));
        let asset = item_json("http://h", platform.item("sunset").unwrap());
        assert!(asset["_links"].get("loc:collection").is_none());
        assert_eq!(asset["attributes"][0]["name"], "Status");
    }
}
