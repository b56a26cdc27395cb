//! Repository error types

use metacache_common::FetchError;
use thiserror::Error;

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, MetadataError>;

/// Errors surfaced by the metadata repository
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata repository isn't started yet, call start() before use")]
    NotStarted,

    #[error("metadata repository has already been cleared and shut down")]
    Cleared,

    #[error("cannot start metadata repository: it has already been cleared and shut down")]
    AlreadyCleared,

    #[error("store does not exist: {store}")]
    NoSuchStore {
        store: String,
        #[source]
        source: Option<FetchError>,
    },

    #[error("invalid schema for store {store}: {detail}")]
    InvalidSchema { store: String, detail: String },

    #[error("store {0} doesn't have a latest value schema")]
    NoLatestSchema(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("failed to fetch metadata of store {store}: {source}")]
    Transient {
        store: String,
        #[source]
        source: FetchError,
    },
}

impl MetadataError {
    /// Create a no-such-store error without an underlying cause
    pub fn no_such_store(store: impl Into<String>) -> Self {
        Self::NoSuchStore {
            store: store.into(),
            source: None,
        }
    }

    /// Create an invalid schema error
    pub fn invalid_schema(store: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidSchema {
            store: store.into(),
            detail: detail.into(),
        }
    }

    /// Classify a fetch failure: not-found causes become `NoSuchStore`,
    /// everything else is transient
    pub fn from_fetch(store: impl Into<String>, err: FetchError) -> Self {
        let store = store.into();
        if err.is_not_found() {
            Self::NoSuchStore {
                store,
                source: Some(err),
            }
        } else {
            Self::Transient { store, source: err }
        }
    }

    /// Check if the repository is not in a usable state
    #[must_use]
    pub fn is_not_usable(&self) -> bool {
        matches!(self, Self::NotStarted | Self::Cleared)
    }

    /// Check if this is a no-such-store error
    #[must_use]
    pub fn is_no_such_store(&self) -> bool {
        matches!(self, Self::NoSuchStore { .. })
    }

    /// Check if retrying later may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
