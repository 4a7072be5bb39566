mod support;

use platform_core::{HttpMethod, ResourceResolver, UriTemplate};
use serde_json::json;
use support::*;

const FALLBACK: &str = "https://p/apis/avid.pam;version=0;realm=global/searches/simple?search={search}{&offset,limit}";

#[test]
fn registered_resource_is_resolved_and_expandable() {
    let fake = FakeTransport::new();
    let session = login(&fake);
    fake.json(
        HttpMethod::Get,
        REGISTRY,
        200,
        json!({"resources": {"search:simple-search": [
            {"href": "https://p/apis/avid.pam;version=2;realm=A/searches/simple?search={search}{&offset,limit}"},
            {"href": "https://p/apis/avid.mam;version=1;realm=B/searches/simple?search={search}"}
        ]}}),
    );

    let found = ResourceResolver::new(&session).resolve(&["avid.pam"], "0", "search:simple-search", FALLBACK);

    assert_eq!(found.len(), 1);
    let url = UriTemplate::new(&found[0])
        .set("search", "sunset beach")
        .set("limit", "25")
        .expand()
        .unwrap();
    assert_eq!(
        url,
        "https://p/apis/avid.pam;version=2;realm=A/searches/simple?search=sunset%20beach&limit=25"
    );
    let request = fake.requests().pop().unwrap();
    assert_eq!(request.url, REGISTRY);
    assert_eq!(request.authorization.as_deref(), Some("Bearer t0"));
}

#[test]
fn missing_registry_falls_back() {
    let fake = FakeTransport::new();
    let session = login(&fake);

    let found = ResourceResolver::new(&session).resolve_default_version(&["avid.pam"], "search:simple-search", FALLBACK);

    assert_eq!(found, vec![FALLBACK]);
    assert_eq!(fake.count(HttpMethod::Get, REGISTRY), 1);
}

#[test]
fn unreachable_registry_falls_back() {
    let fake = FakeTransport::new();
    let session = login(&fake);
    fake.fail(HttpMethod::Get, REGISTRY);

    let found = ResourceResolver::new(&session).resolve(&["avid.pam"], "0", "loc:locations", FALLBACK);

    assert_eq!(found, vec![FALLBACK]);
    assert_eq!(fake.count(HttpMethod::Get, REGISTRY), 1);
    assert_eq!(session.state(), platform_core::SessionState::Active);
}

#[test]
fn unregistered_resource_falls_back() {
    let fake = FakeTransport::new();
    let session = login(&fake);
    fake.json(HttpMethod::Get, REGISTRY, 200, json!({"resources": {"loc:locations": {"href": "https://p/x"}}}));

    let found = ResourceResolver::new(&session).resolve(&["avid.pam"], "0", "search:simple-search", FALLBACK);

    assert_eq!(found, vec![FALLBACK]);
}

#[test]
fn registry_version_selects_the_endpoint() {
    let fake = FakeTransport::new();
    let session = login(&fake);
    let v1 = "https://p/apis/avid.ctms.registry;version=1/serviceroots";
    fake.json(HttpMethod::Get, v1, 200, json!({"resources": {"loc:locations": {"href": "https://p/apis/avid.pam;version=0/locations"}}}));

    let found = ResourceResolver::new(&session).resolve(&["avid.pam"], "1", "loc:locations", "unused");

    assert_eq!(found, vec!["https://p/apis/avid.pam;version=0/locations"]);
    assert_eq!(fake.count(HttpMethod::Get, REGISTRY), 0);
}
