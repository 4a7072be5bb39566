//! Client core for hypermedia (HAL) platform APIs.
//!
//! # Overview
//! Authenticates against the platform, discovers resource locations through
//! the service registry, pages through collections and walks folder trees.
//! Network I/O is delegated to a host-supplied [`Transport`], keeping the
//! core deterministic and testable against scripted responses.
//!
//! # Design
//! - [`SessionManager`] runs the login handshake and returns a [`Session`]
//!   that owns its default headers and keep-alive thread.
//! - [`ResourceResolver`] never fails: registry trouble yields the caller's
//!   fallback template.
//! - [`PageIterator`] is a lazy `Iterator` following `_links.next`.
//! - [`TreeTraverser`] emits a folder, then all sub-folder expansions, then
//!   the folder's leaves.
//! - Each step of the handshake and registry lookup is also exposed as a pure
//!   `build_*` / `parse_*` function.

pub mod cancel;
pub mod config;
pub mod error;
pub mod hal;
pub mod http;
mod keepalive;
pub mod pages;
pub mod registry;
pub mod session;
pub mod template;
pub mod tree;

pub use cancel::CancellationToken;
pub use config::{ClientConfig, KeepAliveStrategy};
pub use error::{ApiError, Result, TransportError};
pub use hal::{HalDocument, Link, OneOrMany, ResourceLocation};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport};
pub use pages::{embedded_items, Page, PageIterator};
pub use registry::ResourceResolver;
pub use session::{Credentials, DefaultHeaders, ProviderSelector, Session, SessionManager, SessionState};
pub use template::{with_query_param, UriTemplate};
pub use tree::{Attributes, SkippedSubtree, Traversal, TreeNode, TreeTraverser, UNKNOWN_ATTRIBUTE};
