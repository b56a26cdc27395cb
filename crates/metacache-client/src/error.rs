//! Client construction errors
//!
//! Failures of individual fetches are reported as
//! [`metacache_common::FetchError`]; this type only covers building a
//! fetch strategy.

use thiserror::Error;

/// Result type for client construction
pub type Result<T> = std::result::Result<T, ClientError>;

/// Error building an HTTP fetch strategy
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

impl ClientError {
    /// Create an invalid endpoint error
    pub fn invalid_endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }
}
