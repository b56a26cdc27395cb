//! Request-based fetch strategy
//!
//! Asks a router for everything: cluster discovery for placement, and a
//! single metadata document carrying the store record together with its
//! key and value schemas.

use crate::error::Result;
use crate::http::HttpTransport;
use async_trait::async_trait;
use metacache_common::{
    FetchError, FetchResult, FetcherConfig, SchemaData, SchemaEntry, Store, StoreConfig,
};
use metacache_repository::MetadataFetcher;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Router response to a cluster discovery request
#[derive(Debug, Deserialize)]
struct DiscoveryResponse {
    #[serde(default)]
    cluster: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Router response carrying the metadata of one store
#[derive(Debug, Deserialize)]
struct MetadataResponse {
    cluster: String,
    store: Store,
    #[serde(default)]
    key_schema: BTreeMap<i32, String>,
    #[serde(default)]
    value_schemas: BTreeMap<i32, String>,
}

impl DiscoveryResponse {
    fn into_store_config(self, store_name: &str) -> FetchResult<Option<StoreConfig>> {
        if let Some(error) = self.error {
            return Err(FetchError::ServiceDiscovery(format!(
                "{store_name}: {error}"
            )));
        }
        Ok(self
            .cluster
            .map(|cluster| StoreConfig::new(store_name, cluster)))
    }
}

impl MetadataResponse {
    fn schema_data(&self, store_name: &str) -> SchemaData {
        let mut data = SchemaData::new(store_name);
        if let Some((id, schema)) = self.key_schema.iter().next() {
            data.set_key_schema(SchemaEntry::new(*id, schema.clone()));
        }
        for (id, schema) in &self.value_schemas {
            data.add_value_schema(SchemaEntry::new(*id, schema.clone()));
        }
        data
    }
}

/// Fetch strategy asking a router per request
pub struct RequestBasedFetcher {
    transport: HttpTransport,
}

impl RequestBasedFetcher {
    /// Create a request-based client for the router at `config.endpoint`
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        Ok(Self {
            transport: HttpTransport::new(config)?,
        })
    }

    async fn fetch_metadata(&self, store_name: &str) -> FetchResult<MetadataResponse> {
        let url = self.transport.url(&["request_based_metadata", store_name]);
        self.transport
            .get_json(url, || FetchError::NotFound(store_name.to_string()))
            .await
    }
}

#[async_trait]
impl MetadataFetcher for RequestBasedFetcher {
    fn name(&self) -> &str {
        "request-based"
    }

    async fn fetch_store_config(&self, store_name: &str) -> FetchResult<Option<StoreConfig>> {
        let url = self.transport.url(&["discover_cluster", store_name]);
        let response: DiscoveryResponse = self
            .transport
            .get_json(url, || FetchError::ServiceDiscovery(store_name.to_string()))
            .await?;
        response.into_store_config(store_name)
    }

    async fn fetch_store(&self, store_name: &str, cluster_name: &str) -> FetchResult<Store> {
        let response = self.fetch_metadata(store_name).await?;
        if response.cluster != cluster_name {
            debug!(
                "Store {} metadata served by cluster {} (expected {})",
                store_name, response.cluster, cluster_name
            );
        }
        Ok(response.store)
    }

    async fn fetch_schema_data(&self, store_name: &str) -> FetchResult<SchemaData> {
        Ok(self.fetch_metadata(store_name).await?.schema_data(store_name))
    }
}
