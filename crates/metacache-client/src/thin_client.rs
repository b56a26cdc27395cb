//! Thin client fetch strategy
//!
//! Reads a store's metadata from its meta system store, one key per
//! request:
//!
//! | Key | Value |
//! |---|---|
//! | `store_cluster_config` | placement record |
//! | `store_properties` | store record (per cluster) |
//! | `store_key_schemas` | key schema by id |
//! | `store_value_schemas` | value schemas by id |
//!
//! A key the meta system store doesn't have is reported as
//! [`FetchError::MissingKey`].

use crate::error::Result;
use crate::http::HttpTransport;
use async_trait::async_trait;
use metacache_common::{
    FetchError, FetchResult, FetcherConfig, SchemaData, SchemaEntry, Store, StoreConfig,
};
use metacache_repository::MetadataFetcher;
use serde::Deserialize;
use std::collections::BTreeMap;

const STORE_CLUSTER_CONFIG: &str = "store_cluster_config";
const STORE_PROPERTIES: &str = "store_properties";
const STORE_KEY_SCHEMAS: &str = "store_key_schemas";
const STORE_VALUE_SCHEMAS: &str = "store_value_schemas";

/// `store_cluster_config` value
#[derive(Debug, Deserialize)]
struct ClusterConfigValue {
    cluster: String,
    #[serde(default)]
    deleting: bool,
    #[serde(default)]
    migration_src_cluster: Option<String>,
    #[serde(default)]
    migration_dest_cluster: Option<String>,
}

impl ClusterConfigValue {
    fn into_store_config(self, store_name: &str) -> StoreConfig {
        StoreConfig {
            store_name: store_name.to_string(),
            cluster: self.cluster,
            migration_src_cluster: self.migration_src_cluster,
            migration_dest_cluster: self.migration_dest_cluster,
            deleting: self.deleting,
        }
    }
}

/// `store_key_schemas` value
#[derive(Debug, Deserialize)]
struct KeySchemasValue {
    key_schema_map: BTreeMap<i32, String>,
}

/// `store_value_schemas` value
#[derive(Debug, Deserialize)]
struct ValueSchemasValue {
    value_schema_map: BTreeMap<i32, String>,
}

fn schema_data(store_name: &str, keys: KeySchemasValue, values: ValueSchemasValue) -> SchemaData {
    let mut data = SchemaData::new(store_name);
    // A store has a single key schema; the map only carries its id.
    if let Some((id, schema)) = keys.key_schema_map.into_iter().next() {
        data.set_key_schema(SchemaEntry::new(id, schema));
    }
    for (id, schema) in values.value_schema_map {
        data.add_value_schema(SchemaEntry::new(id, schema));
    }
    data
}

/// Fetch strategy reading the meta system store over HTTP
pub struct ThinClientFetcher {
    transport: HttpTransport,
}

impl ThinClientFetcher {
    /// Create a thin client for the metadata service at `config.endpoint`
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        Ok(Self {
            transport: HttpTransport::new(config)?,
        })
    }

    async fn get_value<T: serde::de::DeserializeOwned>(
        &self,
        store_name: &str,
        key: &str,
        cluster: Option<&str>,
    ) -> FetchResult<T> {
        let mut url = self.transport.url(&["meta_store", store_name, key]);
        if let Some(cluster) = cluster {
            url.query_pairs_mut().append_pair("cluster", cluster);
        }
        self.transport
            .get_json(url, || FetchError::MissingKey {
                store: store_name.to_string(),
                key: key.to_string(),
            })
            .await
    }
}

#[async_trait]
impl MetadataFetcher for ThinClientFetcher {
    fn name(&self) -> &str {
        "thin-client"
    }

    async fn fetch_store_config(&self, store_name: &str) -> FetchResult<Option<StoreConfig>> {
        match self
            .get_value::<ClusterConfigValue>(store_name, STORE_CLUSTER_CONFIG, None)
            .await
        {
            Ok(value) => Ok(Some(value.into_store_config(store_name))),
            // No placement is not an error at this layer.
            Err(FetchError::MissingKey { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_store(&self, store_name: &str, cluster_name: &str) -> FetchResult<Store> {
        self.get_value(store_name, STORE_PROPERTIES, Some(cluster_name))
            .await
    }

    async fn fetch_schema_data(&self, store_name: &str) -> FetchResult<SchemaData> {
        let keys = self
            .get_value::<KeySchemasValue>(store_name, STORE_KEY_SCHEMAS, None)
            .await?;
        let values = self
            .get_value::<ValueSchemasValue>(store_name, STORE_VALUE_SCHEMAS, None)
            .await?;
        Ok(schema_data(store_name, keys, values))
    }
}
