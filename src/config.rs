//! Connector configuration.
//!
//! Configuration is supplied by the host framework at construction and is
//! immutable for the lifetime of the connector. The API token is a [`Secret`]
//! and never appears in logs or formatted output.

use crate::error::{ConnectorError, ConnectorResult};
use crate::secret::Secret;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

fn default_auth_scheme() -> String {
    "Bearer".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_page_size() -> u32 {
    200
}

fn default_max_pages_per_cycle() -> u32 {
    1000
}

/// Configuration for a connector instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connector name/identifier, used in log prefixes and the user agent.
    pub name: String,
    /// Base URL of the provider API, e.g. "https://myorg.example.com".
    pub base_url: String,
    /// API token attached to every request. Treated as a secret.
    pub api_token: Secret,
    /// Authorization header scheme, e.g. "Bearer" or "SSWS".
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum retries for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Rate limit admission settings for the shared connection.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Records requested per inventory page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Safety valve: maximum pages fetched in one sync cycle.
    #[serde(default = "default_max_pages_per_cycle")]
    pub max_pages_per_cycle: u32,
    /// Additional headers to include on every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ConnectorConfig {
    /// Minimal configuration with defaults for everything optional.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_token: impl Into<Secret>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_token: api_token.into(),
            auth_scheme: default_auth_scheme(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            rate_limit: RateLimitConfig::default(),
            page_size: default_page_size(),
            max_pages_per_cycle: default_max_pages_per_cycle(),
            headers: HashMap::new(),
        }
    }

    /// Validates the mandatory parameters and the knobs that must be nonzero.
    pub fn validate(&self) -> ConnectorResult<()> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(ConnectorError::Config("base_url is required".into()));
        }
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(ConnectorError::Config(format!(
                "base_url must be an http(s) URL, got '{}'",
                url
            )));
        }
        if self.api_token.is_empty() {
            return Err(ConnectorError::Config("api_token is required".into()));
        }
        if self.page_size == 0 {
            return Err(ConnectorError::Config("page_size must be at least 1".into()));
        }
        if self.max_pages_per_cycle == 0 {
            return Err(ConnectorError::Config(
                "max_pages_per_cycle must be at least 1".into(),
            ));
        }
        self.rate_limit.validate()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Rate limit admission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per period.
    pub max_requests: u32,
    /// Period duration in seconds.
    pub period_secs: u64,
    /// Maximum burst size.
    pub burst: u32,
}

impl RateLimitConfig {
    fn validate(&self) -> ConnectorResult<()> {
        if self.max_requests == 0 || self.burst == 0 || self.period_secs == 0 {
            return Err(ConnectorError::Config(
                "rate limit parameters must be nonzero".into(),
            ));
        }
        Ok(())
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            period_secs: 60,
            burst: 10,
        }
    }
}
