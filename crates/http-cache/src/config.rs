//! Configuration for the remote HTTP cache

use crate::limiter::DEFAULT_MAX_CONCURRENT_REQUESTS;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the remote artifact cache
///
/// Secrets (`token`, `signature_key`) are never read from or written to
/// serialized config; they come from the environment or the builder methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCacheConfig {
    /// Base URL of the artifacts API (e.g., "https://vercel.com/api")
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Bearer token for the artifacts API
    #[serde(skip)]
    pub token: Option<SecretString>,

    /// Team identifier, sent as the `teamId` query parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,

    /// Team slug, sent as `slug` when no team id is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_slug: Option<String>,

    /// Sign uploads and require valid tags on downloads
    #[serde(default)]
    pub signature: bool,

    /// Key used for artifact tags
    #[serde(skip)]
    pub signature_key: Option<SecretString>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum concurrent remote cache requests
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Retry configuration for the transport client
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: None,
            team_id: None,
            team_slug: None,
            signature: false,
            signature_key: None,
            timeout_secs: default_timeout_secs(),
            max_concurrent_requests: default_max_concurrent_requests(),
            retry: RetryConfig::default(),
        }
    }
}

impl HttpCacheConfig {
    /// Create config from environment variables
    ///
    /// Reads:
    /// - `CUENV_REMOTE_CACHE_TOKEN`: API token (required)
    /// - `CUENV_REMOTE_CACHE_API`: API base URL
    /// - `CUENV_REMOTE_CACHE_TEAM_ID` / `CUENV_REMOTE_CACHE_TEAM_SLUG`: team scope
    /// - `CUENV_REMOTE_CACHE_SIGNATURE`: enable signing ("true"/"1")
    /// - `CUENV_REMOTE_CACHE_SIGNATURE_KEY`: signing key
    /// - `CUENV_REMOTE_CACHE_TIMEOUT`: request timeout in seconds
    ///
    /// Returns `None` if no token is set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let token = non_empty_var("CUENV_REMOTE_CACHE_TOKEN")?;
        let defaults = Self::default();

        Some(Self {
            api_url: non_empty_var("CUENV_REMOTE_CACHE_API").unwrap_or(defaults.api_url),
            token: Some(SecretString::from(token)),
            team_id: non_empty_var("CUENV_REMOTE_CACHE_TEAM_ID"),
            team_slug: non_empty_var("CUENV_REMOTE_CACHE_TEAM_SLUG"),
            signature: non_empty_var("CUENV_REMOTE_CACHE_SIGNATURE")
                .is_some_and(|v| v == "true" || v == "1"),
            signature_key: non_empty_var("CUENV_REMOTE_CACHE_SIGNATURE_KEY")
                .map(SecretString::from),
            timeout_secs: non_empty_var("CUENV_REMOTE_CACHE_TIMEOUT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            ..defaults
        })
    }

    /// Set the API token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(SecretString::from(token.into()));
        self
    }

    /// Enable signing with `key`
    #[must_use]
    pub fn with_signature_key(mut self, key: impl Into<String>) -> Self {
        self.signature = true;
        self.signature_key = Some(SecretString::from(key.into()));
        self
    }

    /// Request timeout as a `Duration`
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry configuration with exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// Default value functions
fn default_api_url() -> String {
    "https://vercel.com/api".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_requests() -> usize {
    DEFAULT_MAX_CONCURRENT_REQUESTS
}

fn default_max_attempts() -> usize {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}
