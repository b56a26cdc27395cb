//! Configuration types for metacache
//!
//! This module defines the configuration consumed by the repository and by
//! the fetch strategies that talk to the metadata service.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Repository configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Interval between full cache refreshes (seconds)
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// How long `clear()` waits for an in-flight refresh (seconds)
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Use the request-based fetch strategy instead of the thin client
    #[serde(default)]
    pub use_request_based_metadata: bool,
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_shutdown_grace_secs() -> u64 {
    60
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            use_request_based_metadata: false,
        }
    }
}

impl RepositoryConfig {
    /// Set the refresh interval
    pub fn with_refresh_interval_secs(mut self, secs: u64) -> Self {
        self.refresh_interval_secs = secs;
        self
    }

    /// Set the shutdown grace period
    pub fn with_shutdown_grace_secs(mut self, secs: u64) -> Self {
        self.shutdown_grace_secs = secs;
        self
    }

    /// Select the request-based fetch strategy
    pub fn with_request_based_metadata(mut self, enabled: bool) -> Self {
        self.use_request_based_metadata = enabled;
        self
    }

    /// Refresh interval as a duration (never zero)
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    /// Shutdown grace period as a duration
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Fetch strategy configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Metadata service (thin client) or router (request-based) URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_endpoint() -> String {
    "http://localhost:7777".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl FetcherConfig {
    /// Create a config for an endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Set the request timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Request timeout as a duration
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Endpoint without a trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }
}
