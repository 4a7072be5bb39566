//! Generic hypermedia (HAL) document model.
//!
//! # Design
//! Every platform response is parsed into the same `HalDocument` shape:
//! `_links` and `_embedded` are modelled, everything else stays an opaque JSON
//! map that callers project with their own extraction code. Relations may hold
//! a single value or an array; both forms are accepted and read through
//! slices so callers never branch on the wire shape.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// A relation value that is either a single element or an array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => std::slice::from_ref(item),
        }
    }
}

/// A raw `_links` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub templated: bool,
}

/// A link resolved against its relation name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocation {
    pub relation: String,
    pub href: String,
    /// The href contains RFC 6570 variables that must be expanded first.
    pub is_template: bool,
}

impl ResourceLocation {
    fn from_link(relation: &str, link: &Link) -> Self {
        Self {
            relation: relation.to_string(),
            href: link.href.clone(),
            is_template: link.templated || link.href.contains('{'),
        }
    }
}

/// A parsed hypermedia response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HalDocument {
    #[serde(rename = "_links", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, OneOrMany<Link>>,

    /// `None` when the response carries no `_embedded` section at all, which
    /// is how the platform signals an exhausted or empty collection.
    #[serde(rename = "_embedded", default, skip_serializing_if = "Option::is_none")]
    pub embedded: Option<BTreeMap<String, OneOrMany<HalDocument>>>,

    #[serde(flatten)]
    pub fields: serde_json::Map<String, Value>,
}

impl HalDocument {
    pub fn parse(body: &str) -> Result<Self, ApiError> {
        serde_json::from_str(body)
            .map_err(|e| ApiError::Protocol(format!("malformed hypermedia document: {e}")))
    }

    /// First link of a relation.
    pub fn link(&self, relation: &str) -> Option<ResourceLocation> {
        self.links
            .get(relation)
            .and_then(|links| links.as_slice().first())
            .map(|link| ResourceLocation::from_link(relation, link))
    }

    /// All links of a relation, in document order.
    pub fn links(&self, relation: &str) -> Vec<ResourceLocation> {
        self.links
            .get(relation)
            .map(|links| {
                links
                    .as_slice()
                    .iter()
                    .map(|link| ResourceLocation::from_link(relation, link))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The link of a relation carrying the given `name` attribute.
    pub fn named_link(&self, relation: &str, name: &str) -> Option<ResourceLocation> {
        self.links.get(relation).and_then(|links| {
            links
                .as_slice()
                .iter()
                .find(|link| link.name.as_deref() == Some(name))
                .map(|link| ResourceLocation::from_link(relation, link))
        })
    }

    /// Like [`link`](Self::link) but a missing relation is a protocol error.
    pub fn require_link(&self, relation: &str) -> Result<ResourceLocation, ApiError> {
        self.link(relation)
            .ok_or_else(|| ApiError::Protocol(format!("missing link relation `{relation}`")))
    }

    pub fn has_link(&self, relation: &str) -> bool {
        self.links.contains_key(relation)
    }

    pub fn has_embedded(&self) -> bool {
        self.embedded.is_some()
    }

    /// Embedded documents of a relation; empty when absent.
    pub fn embedded(&self, relation: &str) -> &[HalDocument] {
        self.embedded
            .as_ref()
            .and_then(|embedded| embedded.get(relation))
            .map(OneOrMany::as_slice)
            .unwrap_or(&[])
    }

    pub fn embedded_one(&self, relation: &str) -> Option<&HalDocument> {
        self.embedded(relation).first()
    }

    pub fn has_embedded_relation(&self, relation: &str) -> bool {
        self.embedded
            .as_ref()
            .is_some_and(|embedded| embedded.contains_key(relation))
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Walk nested application fields, e.g. `["common", "name"]`.
    pub fn field_path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.fields.get(*first)?, |value, key| value.get(*key))
    }

    pub fn str_field(&self, path: &[&str]) -> Option<&str> {
        self.field_path(path).and_then(Value::as_str)
    }

    /// Deserialize the application fields into a caller-defined type.
    pub fn extract<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|e| ApiError::Protocol(format!("unexpected document shape: {e}")))
    }
}
