//! Error types for metadata fetches
//!
//! Every fetch strategy reports failures through [`FetchError`]. The
//! repository decides from the variant whether a failure means the store
//! is gone or whether the next refresh cycle should simply try again.

use thiserror::Error;

/// Result type for fetch strategy operations
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Error returned by a metadata fetch strategy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("store not found: {0}")]
    NotFound(String),

    #[error("cluster discovery failed: {0}")]
    ServiceDiscovery(String),

    #[error("missing key {key} in metadata of store {store}")]
    MissingKey { store: String, key: String },

    #[error("request timeout")]
    Timeout,

    #[error("metadata service unavailable: {0}")]
    Unavailable(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl FetchError {
    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a deserialization error
    pub fn deserialization(msg: impl Into<String>) -> Self {
        Self::Deserialization(msg.into())
    }

    /// Check if this error means the store does not exist (deleted or never created)
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::ServiceDiscovery(_) | Self::MissingKey { .. }
        )
    }

    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}
