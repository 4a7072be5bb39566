//! Resource discovery through the platform's service registry.
//!
//! # Design
//! The registry is optional infrastructure. Every way the lookup can go wrong
//! (unreachable, unexpected status, garbage body, missing entry, no entry for
//! the requested service types) ends in the caller's fallback template, so
//! `resolve` has no error path at all. Each fallback is logged at `info`
//! with the reason.

use serde_json::Value;
use tracing::{debug, info};

use crate::http::{HttpRequest, HttpResponse};
use crate::session::Session;

const REGISTRY_SERVICE: &str = "avid.ctms.registry";

/// Looks up canonical resource locations for one session.
#[derive(Debug, Clone, Copy)]
pub struct ResourceResolver<'s> {
    session: &'s Session,
}

impl<'s> ResourceResolver<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self { session }
    }

    /// Hrefs (possibly URI templates) registered for `resource_name` whose
    /// href contains one of `service_types`, in registry order; otherwise
    /// exactly `[fallback_template]`.
    pub fn resolve(
        &self,
        service_types: &[&str],
        registry_version: &str,
        resource_name: &str,
        fallback_template: &str,
    ) -> Vec<String> {
        let request = build_service_roots(&self.session.url(""), registry_version);
        let url = request.url.clone();
        match self.session.send(request) {
            Ok(response) => parse_service_roots(&response, service_types, resource_name, fallback_template),
            Err(err) => {
                info!(url = %url, error = %err, resource_name, "registry not reachable, using fallback template");
                vec![fallback_template.to_string()]
            }
        }
    }

    /// [`resolve`](Self::resolve) with the registry version from the
    /// session's configuration.
    pub fn resolve_default_version(
        &self,
        service_types: &[&str],
        resource_name: &str,
        fallback_template: &str,
    ) -> Vec<String> {
        let version = self.session.config().registry_version.clone();
        self.resolve(service_types, &version, resource_name, fallback_template)
    }
}

pub fn build_service_roots(base_url: &str, registry_version: &str) -> HttpRequest {
    HttpRequest::get(format!(
        "{base_url}/apis/{REGISTRY_SERVICE};version={registry_version}/serviceroots"
    ))
    .with_header("accept", "application/json")
}

pub fn parse_service_roots(
    response: &HttpResponse,
    service_types: &[&str],
    resource_name: &str,
    fallback_template: &str,
) -> Vec<String> {
    let fallback = |reason: &str| {
        info!(resource_name, reason, "using fallback template");
        vec![fallback_template.to_string()]
    };

    if response.status != 200 && response.status != 303 {
        return fallback(&format!("registry answered HTTP {}", response.status));
    }
    let Ok(body) = serde_json::from_str::<Value>(&response.body) else {
        return fallback("registry response is not JSON");
    };
    let Some(resources) = body.get("resources").filter(|r| r.is_object()) else {
        return fallback("no registered resources");
    };
    let Some(entry) = resources.get(resource_name) else {
        return fallback("resource not registered");
    };

    let links: Vec<&Value> = match entry {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    let found: Vec<String> = links
        .into_iter()
        .filter_map(|link| link.get("href").and_then(Value::as_str))
        .filter(|href| service_types.iter().any(|service| href.contains(service)))
        .map(str::to_string)
        .collect();

    if found.is_empty() {
        return fallback("resource not registered for the requested service types");
    }
    debug!(resource_name, count = found.len(), "resource resolved through registry");
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const FALLBACK: &str = "https://p/apis/svc;version=0;realm=r/locations";

    fn ok(body: &str) -> HttpResponse {
        HttpResponse::new(200, body)
    }

    #[test]
    fn request_targets_the_versioned_service_roots() {
        let req = build_service_roots("https://p", "0");
        assert_eq!(req.url, "https://p/apis/avid.ctms.registry;version=0/serviceroots");
    }

    #[test]
    fn array_entry_is_filtered_in_order() {
        let resp = ok(r#"{"resources": {"loc:locations": [
            {"href": "https://p/apis/svc-a;version=0;realm=1/locations"},
            {"href": "https://p/apis/other;version=0/locations"},
            {"href": "https://p/apis/svc-b;version=0;realm=2/locations"}
        ]}}"#);
        let found = parse_service_roots(&resp, &["svc-a", "svc-b"], "loc:locations", FALLBACK);
        assert_eq!(
            found,
            vec![
                "https://p/apis/svc-a;version=0;realm=1/locations",
                "https://p/apis/svc-b;version=0;realm=2/locations"
            ]
        );
    }

    #[test]
    fn single_link_entry_is_accepted() {
        let resp = ok(r#"{"resources": {"search:simple-search": {"href": "https://p/apis/svc;version=0/searches/simple?search={search}"}}}"#);
        let found = parse_service_roots(&resp, &["svc"], "search:simple-search", FALLBACK);
        assert_eq!(found, vec!["https://p/apis/svc;version=0/searches/simple?search={search}"]);
    }

    #[test]
    fn see_other_is_treated_as_success() {
        let resp = HttpResponse::new(303, r#"{"resources": {"x": {"href": "https://p/svc/x"}}}"#);
        assert_eq!(parse_service_roots(&resp, &["svc"], "x", FALLBACK), vec!["https://p/svc/x"]);
    }

    #[test]
    fn every_failure_mode_yields_only_the_fallback() {
        let cases = [
            HttpResponse::new(404, "not found"),
            HttpResponse::new(500, ""),
            ok("<html>"),
            ok(r#"{}"#),
            ok(r#"{"resources": null}"#),
            ok(r#"{"resources": {}}"#),
            ok(r#"{"resources": {"loc:locations": []}}"#),
            ok(r#"{"resources": {"loc:locations": {"href": "https://p/other/locations"}}}"#),
            ok(r#"{"resources": {"loc:locations": [{"title": "no href"}]}}"#),
        ];
        for resp in &cases {
            assert_eq!(
                parse_service_roots(resp, &["svc"], "loc:locations", FALLBACK),
                vec![FALLBACK],
                "body: {}",
                resp.body
            );
        }
    }
}
