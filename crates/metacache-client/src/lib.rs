//! metacache Client - HTTP fetch strategies
//!
//! Two interchangeable ways of reaching the metadata service:
//! [`ThinClientFetcher`] reads each store's meta system store, while
//! [`RequestBasedFetcher`] asks a router. [`build_fetcher`] picks one from
//! configuration.

pub mod error;
mod http;
pub mod request_based;
pub mod thin_client;

pub use error::{ClientError, Result};
pub use request_based::RequestBasedFetcher;
pub use thin_client::ThinClientFetcher;

use metacache_common::{FetcherConfig, RepositoryConfig};
use metacache_repository::MetadataFetcher;
use std::sync::Arc;
use tracing::info;

/// Build the fetch strategy selected by `repository`
pub fn build_fetcher(
    repository: &RepositoryConfig,
    fetcher: &FetcherConfig,
) -> Result<Arc<dyn MetadataFetcher>> {
    let strategy: Arc<dyn MetadataFetcher> = if repository.use_request_based_metadata {
        Arc::new(RequestBasedFetcher::new(fetcher)?)
    } else {
        Arc::new(ThinClientFetcher::new(fetcher)?)
    };

    info!(
        "Using {} metadata fetcher against {}",
        strategy.name(),
        fetcher.base_url()
    );
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_fetcher_selects_strategy() {
        let fetcher = FetcherConfig::new("http://localhost:7777");

        let thin = build_fetcher(&RepositoryConfig::default(), &fetcher).unwrap();
        assert_eq!(thin.name(), "thin-client");

        let request_based = build_fetcher(
            &RepositoryConfig::default().with_request_based_metadata(true),
            &fetcher,
        )
        .unwrap();
        assert_eq!(request_based.name(), "request-based");
    }

    #[test]
    fn test_build_fetcher_rejects_bad_endpoint() {
        let result = build_fetcher(&RepositoryConfig::default(), &FetcherConfig::new("::"));
        assert!(matches!(result, Err(ClientError::InvalidEndpoint { .. })));
    }
}
