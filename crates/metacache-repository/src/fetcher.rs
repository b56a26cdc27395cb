//! Pluggable remote fetch strategy
//!
//! The repository never talks to the metadata service directly. It asks a
//! [`MetadataFetcher`] for the three pieces it mirrors: where a store lives,
//! the store record itself, and the store's schemas. Concrete strategies are
//! chosen when the repository is built.

use async_trait::async_trait;
use metacache_common::{FetchResult, SchemaData, Store, StoreConfig};

/// Remote source of store metadata
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Strategy name for logging
    fn name(&self) -> &str;

    /// Fetch the placement record of a store
    ///
    /// `Ok(None)` means the metadata service answered but has no placement
    /// for the store.
    async fn fetch_store_config(&self, store_name: &str) -> FetchResult<Option<StoreConfig>>;

    /// Fetch the store record from the cluster hosting it
    async fn fetch_store(&self, store_name: &str, cluster_name: &str) -> FetchResult<Store>;

    /// Fetch the key schema and all value schemas of a store
    async fn fetch_schema_data(&self, store_name: &str) -> FetchResult<SchemaData>;
}
