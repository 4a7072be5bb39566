//! Recursive traversal of folder-like hypermedia trees.
//!
//! # Design
//! A folder announces its children through an embedded `loc:collection`
//! document whose `loc:item` entries are paginated like any other collection.
//! The result order is fixed and relied upon by consumers:
//!
//! 1. the folder itself,
//! 2. the full expansion of every sub-folder, in listing order,
//! 3. the folder's own leaf items.
//!
//! Failures below the root are contained: a sub-folder that cannot be fetched
//! is recorded in [`Traversal::skipped`] and its siblings are still visited.
//! Only cancellation and a failing root abort the walk.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::error::{ApiError, Result};
use crate::hal::HalDocument;
use crate::pages::PageIterator;
use crate::session::Session;

/// Returned by [`TreeNode::attribute`] for names the item does not carry.
pub const UNKNOWN_ATTRIBUTE: &str = "#UNKNOWN_ATTRIBUTE#";

/// Case-insensitive attribute map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(BTreeMap<String, String>);

impl Attributes {
    /// Insert or overwrite; `Comment` and `COMMENT` are the same key.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries with lower-cased names, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One item of a folder tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub id: Option<String>,
    pub name: String,
    /// The item's `base.type`, e.g. `folder` or `asset`.
    pub kind: Option<String>,
    pub href: String,
    pub depth: usize,
    pub has_children: bool,
    attributes: Attributes,
}

impl TreeNode {
    /// Placeholder for a traversal entry point known only by its URL.
    pub fn root(href: impl Into<String>) -> Self {
        Self {
            id: None,
            name: String::new(),
            kind: None,
            href: href.into(),
            depth: 0,
            has_children: true,
            attributes: Attributes::default(),
        }
    }

    pub fn from_document(item: &HalDocument, depth: usize) -> Result<Self> {
        Self::build(item, depth, None)
    }

    fn build(item: &HalDocument, depth: usize, fetched_from: Option<&str>) -> Result<Self> {
        let href = item
            .link("self")
            .map(|link| link.href)
            .or_else(|| fetched_from.map(str::to_string))
            .ok_or_else(|| ApiError::Protocol("item representation has no `self` link".to_string()))?;

        let mut attributes = Attributes::default();
        if let Some(Value::Object(common)) = item.field("common") {
            for (name, value) in common {
                if let Some(value) = attribute_value(value) {
                    attributes.insert(name, value);
                }
            }
        }
        if let Some(Value::Array(extra)) = item.field("attributes") {
            for entry in extra {
                let name = entry.get("name").and_then(Value::as_str);
                let value = entry.get("value").and_then(attribute_value);
                if let (Some(name), Some(value)) = (name, value) {
                    attributes.insert(name, value);
                }
            }
        }

        Ok(Self {
            id: item.str_field(&["base", "id"]).map(str::to_string),
            name: item.str_field(&["common", "name"]).unwrap_or_default().to_string(),
            kind: item.str_field(&["base", "type"]).map(str::to_string),
            href,
            depth,
            has_children: item.has_link("loc:collection") || item.has_embedded_relation("loc:collection"),
            attributes,
        })
    }

    /// Attribute value, or [`UNKNOWN_ATTRIBUTE`]. Lookup ignores case.
    pub fn attribute(&self, name: &str) -> &str {
        self.attributes.get(name).unwrap_or(UNKNOWN_ATTRIBUTE)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

impl fmt::Display for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for _ in 0..self.depth {
            f.write_str("\t")?;
        }
        if self.has_children {
            f.write_str("- (collection) ")?;
        }
        write!(f, "depth: {} {}", self.depth, self.name)
    }
}

fn attribute_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// A subtree that could not be visited.
#[derive(Debug)]
pub struct SkippedSubtree {
    pub href: String,
    pub error: ApiError,
}

/// Outcome of a traversal.
#[derive(Debug, Default)]
pub struct Traversal {
    /// Visited nodes in traversal order.
    pub nodes: Vec<TreeNode>,
    pub skipped: Vec<SkippedSubtree>,
}

impl Traversal {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Walks a folder tree depth-first with one request at a time.
pub struct TreeTraverser<'s> {
    session: &'s Session,
    cancel: Option<CancellationToken>,
}

impl<'s> TreeTraverser<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self { session, cancel: None }
    }

    /// Checked before every node fetch and every page fetch.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Entry point of a locations resource (`_links.loc:root-item`).
    pub fn root_from_locations(&self, locations_url: &str) -> Result<TreeNode> {
        let locations = self.session.fetch_document(locations_url)?;
        Ok(TreeNode::root(locations.require_link("loc:root-item")?.href))
    }

    pub fn traverse(&self, root: &TreeNode) -> Result<Traversal> {
        let mut traversal = Traversal::default();
        let (node, document) = self.load(&root.href, root.depth)?;
        self.expand(node, &document, &mut traversal)?;
        debug!(
            href = %root.href,
            nodes = traversal.nodes.len(),
            skipped = traversal.skipped.len(),
            "traversal finished"
        );
        Ok(traversal)
    }

    fn load(&self, href: &str, depth: usize) -> Result<(TreeNode, HalDocument)> {
        if let Some(token) = &self.cancel {
            token.check()?;
        }
        let document = self.session.fetch_document(href)?;
        let node = TreeNode::build(&document, depth, Some(href))?;
        Ok((node, document))
    }

    fn visit(&self, child: &TreeNode, out: &mut Traversal) -> Result<()> {
        match self.load(&child.href, child.depth) {
            Ok((node, document)) => self.expand(node, &document, out),
            Err(ApiError::Cancelled) => Err(ApiError::Cancelled),
            Err(error) => {
                warn!(href = %child.href, error = %error, "skipping subtree");
                out.skipped.push(SkippedSubtree {
                    href: child.href.clone(),
                    error,
                });
                Ok(())
            }
        }
    }

    fn expand(&self, node: TreeNode, document: &HalDocument, out: &mut Traversal) -> Result<()> {
        let child_depth = node.depth + 1;
        let href = node.href.clone();
        out.nodes.push(node);

        let children = self.children(&href, document, child_depth, out)?;
        let (collections, leaves): (Vec<TreeNode>, Vec<TreeNode>) =
            children.into_iter().partition(|child| child.has_children);
        for collection in &collections {
            self.visit(collection, out)?;
        }
        out.nodes.extend(leaves);
        Ok(())
    }

    /// Every item listed by the node's embedded collection, across all pages.
    /// A paging failure keeps what was gathered so far.
    fn children(&self, href: &str, document: &HalDocument, depth: usize, out: &mut Traversal) -> Result<Vec<TreeNode>> {
        let Some(collection) = document.embedded_one("loc:collection") else {
            return Ok(Vec::new());
        };
        let collection_url = collection.link("self").map(|link| link.href).unwrap_or_else(|| href.to_string());

        let project = |page: &HalDocument| {
            page.embedded("loc:item")
                .iter()
                .map(|item| TreeNode::from_document(item, depth))
                .collect::<Result<Vec<_>>>()
        };
        let mut pages = PageIterator::from_document(self.session, &collection_url, collection.clone(), project);
        if let Some(token) = &self.cancel {
            pages = pages.with_cancellation(token.clone());
        }

        let mut children = Vec::new();
        for page in pages {
            match page {
                Ok(page) => children.extend(page.items),
                Err(ApiError::Cancelled) => return Err(ApiError::Cancelled),
                Err(error) => {
                    warn!(href = %collection_url, error = %error, "folder listing incomplete");
                    out.skipped.push(SkippedSubtree {
                        href: collection_url.clone(),
                        error,
                    });
                    break;
                }
            }
        }
        Ok(children)
    }
}
