//! Lazy iteration over paginated hypermedia collections.
//!
//! # Design
//! A collection page is any document with an `_embedded` section; the next
//! page is announced by `_links.next`. `PageIterator` fetches one page per
//! `next()` call, strictly in server order, and never fetches ahead.
//!
//! Termination rules:
//! - a page without `_embedded` ends the sequence (no page is yielded for it);
//! - a page without `_links.next` is the last one;
//! - a `next` href that was already fetched in this sequence yields a
//!   `Protocol` error instead of looping;
//! - any fetch or projection error is yielded once, then the iterator is
//!   exhausted.

use std::collections::HashSet;
use std::marker::PhantomData;

use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::{ApiError, Result};
use crate::hal::{HalDocument, ResourceLocation};
use crate::session::Session;

/// One page of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// URL this page was fetched from.
    pub url: String,
    pub items: Vec<T>,
    pub next_link: Option<ResourceLocation>,
}

enum Cursor {
    Fetch(String),
    Loaded { url: String, document: HalDocument },
    Failed(ApiError),
    Done,
}

/// Iterator of `Result<Page<T>>` following `_links.next`.
///
/// `projector` turns a page document into its items; see
/// [`embedded_items`] for the common case.
pub struct PageIterator<'s, T, F> {
    session: &'s Session,
    cursor: Cursor,
    visited: HashSet<String>,
    projector: F,
    cancel: Option<CancellationToken>,
    _items: PhantomData<fn() -> T>,
}

impl<'s, T, F> PageIterator<'s, T, F>
where
    F: FnMut(&HalDocument) -> Result<Vec<T>>,
{
    pub fn new(session: &'s Session, first_page_url: &str, projector: F) -> Self {
        let url = normalize_href(first_page_url);
        Self::with_cursor(session, url.clone(), Cursor::Fetch(url), projector)
    }

    /// Start from a page that is already in hand, e.g. the first page of a
    /// folder embedded in the folder's own representation.
    pub fn from_document(session: &'s Session, url: &str, document: HalDocument, projector: F) -> Self {
        let url = normalize_href(url);
        Self::with_cursor(
            session,
            url.clone(),
            Cursor::Loaded { url, document },
            projector,
        )
    }

    fn with_cursor(session: &'s Session, first_url: String, cursor: Cursor, projector: F) -> Self {
        Self {
            session,
            cursor,
            visited: HashSet::from([first_url]),
            projector,
            cancel: None,
            _items: PhantomData,
        }
    }

    /// Check `token` before every page fetch.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Concatenate the items of every page, or return the first error.
    pub fn collect_items(self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        for page in self {
            items.extend(page?.items);
        }
        Ok(items)
    }

    fn fetch(&self, url: &str) -> Result<HalDocument> {
        if let Some(token) = &self.cancel {
            token.check()?;
        }
        debug!(url, "fetching page");
        self.session.fetch_document(url)
    }
}

impl<T, F> Iterator for PageIterator<'_, T, F>
where
    F: FnMut(&HalDocument) -> Result<Vec<T>>,
{
    type Item = Result<Page<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let (url, document) = match std::mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::Done => return None,
            Cursor::Failed(err) => return Some(Err(err)),
            Cursor::Loaded { url, document } => (url, document),
            Cursor::Fetch(url) => match self.fetch(&url) {
                Ok(document) => (url, document),
                Err(err) => return Some(Err(err)),
            },
        };

        if !document.has_embedded() {
            debug!(url = %url, "page without embedded items ends the collection");
            return None;
        }
        let items = match (self.projector)(&document) {
            Ok(items) => items,
            Err(err) => return Some(Err(err)),
        };

        let next_link = document.link("next");
        if let Some(next) = &next_link {
            let next_url = normalize_href(&next.href);
            if self.visited.insert(next_url.clone()) {
                self.cursor = Cursor::Fetch(next_url);
            } else {
                self.cursor = Cursor::Failed(ApiError::Protocol(format!(
                    "pagination does not advance: {url} links to already visited {next_url}"
                )));
            }
        }

        Some(Ok(Page {
            url,
            items,
            next_link,
        }))
    }
}

/// Projector yielding the embedded documents of one relation.
pub fn embedded_items(relation: impl Into<String>) -> impl FnMut(&HalDocument) -> Result<Vec<HalDocument>> {
    let relation = relation.into();
    move |document: &HalDocument| Ok(document.embedded(&relation).to_vec())
}

/// Hrefs handed out by the platform occasionally contain raw spaces.
fn normalize_href(href: &str) -> String {
    href.replace(' ', "%20")
}
