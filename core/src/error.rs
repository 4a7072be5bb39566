//! Error types for the platform client core.
//!
//! # Design
//! `Fetch` is kept apart from `Transport` because callers walking a
//! collection need the URL that failed, while authentication and logout
//! steps only need to know that the handshake broke. Registry lookups never
//! surface errors at all; they fall back to the caller's template.

use thiserror::Error;

use crate::session::SessionState;

/// A request produced no usable HTTP exchange, or a handshake step answered
/// with an unexpected status.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No HTTP status was received (connect failure, timeout, TLS, ...).
    #[error("network failure for {url}: {message}")]
    Network { url: String, message: String },

    /// The server answered with a status the step does not accept.
    #[error("HTTP {status} from {url}: {body}")]
    Status { url: String, status: u16, body: String },
}

/// Errors returned by session, registry, pagination and traversal operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No matching identity provider, rejected credentials, or a login
    /// response without any usable token.
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Malformed hypermedia document or a pagination chain that does not
    /// advance.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Retrieval of a specific resource failed.
    #[error("fetching {url} failed with HTTP {status}: {body}")]
    Fetch { url: String, status: u16, body: String },

    #[error("operation cancelled")]
    Cancelled,

    /// The operation needs an active session.
    #[error("session is not active ({0:?})")]
    InactiveSession(SessionState),

    /// A request payload could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;
