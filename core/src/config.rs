//! Client configuration.
//!
//! Every field has a default so an empty JSON object, or an environment with
//! no `PLATFORM_*` variables, yields a working production configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Floor applied to the keep-alive interval so the loop never spins.
const MIN_KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(1);

/// How the keep-alive task prevents server-side session expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeepAliveStrategy {
    /// Re-read the current token resource and POST its extension link.
    #[default]
    ExtendToken,
    /// Issue a GET against the middleware ping endpoint.
    Ping,
}

/// Settings shared by every session created through one `SessionManager`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// URL scheme used to reach `apiDomain` (`https` on real platforms).
    pub scheme: String,

    /// Version segment of the registry service root.
    pub registry_version: String,

    pub request_timeout_ms: u64,

    pub keep_alive_interval_ms: u64,

    /// Consecutive keep-alive failures after which the session is closed.
    pub keep_alive_failure_threshold: u32,

    pub keep_alive_strategy: KeepAliveStrategy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            registry_version: "0".to_string(),
            request_timeout_ms: 60_000,
            keep_alive_interval_ms: 120_000,
            keep_alive_failure_threshold: 3,
            keep_alive_strategy: KeepAliveStrategy::ExtendToken,
        }
    }
}

impl ClientConfig {
    pub fn from_json(raw: &str) -> Result<Self, ApiError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ApiError::Serialization(format!("invalid client config: {e}")))?;
        config.validate()
    }

    /// Read overrides from `PLATFORM_SCHEME`, `PLATFORM_REGISTRY_VERSION`,
    /// `PLATFORM_REQUEST_TIMEOUT_MS`, `PLATFORM_KEEP_ALIVE_INTERVAL_MS`,
    /// `PLATFORM_KEEP_ALIVE_FAILURE_THRESHOLD` and
    /// `PLATFORM_KEEP_ALIVE_STRATEGY`.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ApiError> {
        let mut config = Self::default();
        if let Some(scheme) = lookup("PLATFORM_SCHEME") {
            config.scheme = scheme;
        }
        if let Some(version) = lookup("PLATFORM_REGISTRY_VERSION") {
            config.registry_version = version;
        }
        if let Some(raw) = lookup("PLATFORM_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse_number("PLATFORM_REQUEST_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("PLATFORM_KEEP_ALIVE_INTERVAL_MS") {
            config.keep_alive_interval_ms = parse_number("PLATFORM_KEEP_ALIVE_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("PLATFORM_KEEP_ALIVE_FAILURE_THRESHOLD") {
            config.keep_alive_failure_threshold = parse_number("PLATFORM_KEEP_ALIVE_FAILURE_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("PLATFORM_KEEP_ALIVE_STRATEGY") {
            config.keep_alive_strategy = serde_json::from_value(serde_json::Value::String(raw.clone()))
                .map_err(|_| ApiError::Serialization(format!("PLATFORM_KEEP_ALIVE_STRATEGY: unknown strategy `{raw}`")))?;
        }
        config.validate()
    }

    fn validate(self) -> Result<Self, ApiError> {
        if self.keep_alive_interval_ms == 0 {
            return Err(ApiError::Serialization(
                "keep_alive_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ApiError::Serialization("request_timeout_ms must be greater than zero".to_string()));
        }
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms).max(MIN_KEEP_ALIVE_INTERVAL)
    }

    /// `{scheme}://{api_domain}{path}`
    pub fn url(&self, api_domain: &str, path: &str) -> String {
        format!("{}://{}{}", self.scheme, api_domain.trim_end_matches('/'), path)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::Serialization(format!("{key}: expected a number, got `{raw}`")))
}
