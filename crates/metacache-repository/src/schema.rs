//! Read-through schema accessors
//!
//! Every schema query goes through [`MetadataRepository::schema_data`]: a
//! cached schema set is served as is, a missing one is fetched and cached
//! first. Schemas are only fetched for subscribed stores.

use crate::error::{MetadataError, Result};
use crate::repository::MetadataRepository;
use metacache_common::{SchemaData, SchemaEntry};
use std::sync::Arc;
use tracing::debug;

impl MetadataRepository {
    /// Schema set of a store, fetching it on a cache miss
    pub(crate) async fn schema_data(&self, store_name: &str) -> Result<Arc<SchemaData>> {
        self.lifecycle.ensure_usable()?;
        if let Some(cached) = self.schemas.get(store_name) {
            return Ok(Arc::clone(&cached));
        }
        self.fetch_and_cache_schema_data(store_name).await
    }

    /// Fetch the schema set of a subscribed store and cache it
    pub(crate) async fn fetch_and_cache_schema_data(&self, store_name: &str) -> Result<Arc<SchemaData>> {
        if !self.subscribed_stores.contains_key(store_name) {
            return Err(MetadataError::no_such_store(store_name));
        }

        let data = self
            .fetcher
            .fetch_schema_data(store_name)
            .await
            .map_err(|e| MetadataError::from_fetch(store_name, e))?;

        let data = Arc::new(data);
        self.install_schema_data(store_name, Arc::clone(&data))?;
        debug!(
            "Cached schemas of store {}: {} value schemas",
            store_name,
            data.value_schema_count()
        );
        Ok(data)
    }

    /// Cache a schema set, provided the store is still subscribed
    ///
    /// The store record's guard is held across the insert; `remove_store`
    /// drops the record before the schemas, so it cannot interleave.
    fn install_schema_data(&self, store_name: &str, data: Arc<SchemaData>) -> Result<()> {
        let _state = self.lifecycle.install_guard()?;
        let Some(_subscribed) = self.subscribed_stores.get(store_name) else {
            return Err(MetadataError::no_such_store(store_name));
        };
        self.schemas.insert(store_name.to_string(), data);
        Ok(())
    }

    /// Key schema of a store
    pub async fn get_key_schema(&self, store_name: &str) -> Result<Option<SchemaEntry>> {
        Ok(self.schema_data(store_name).await?.key_schema().cloned())
    }

    /// Value schema by id; an unknown id is `InvalidSchema`
    pub async fn get_value_schema(&self, store_name: &str, id: i32) -> Result<SchemaEntry> {
        self.schema_data(store_name)
            .await?
            .value_schema(id)
            .cloned()
            .ok_or_else(|| {
                MetadataError::invalid_schema(store_name, format!("value schema {id} doesn't exist"))
            })
    }

    /// Whether a value schema with `id` exists
    pub async fn has_value_schema(&self, store_name: &str, id: i32) -> Result<bool> {
        Ok(self.schema_data(store_name).await?.value_schema(id).is_some())
    }

    /// Id of the value schema matching `schema` by content
    pub async fn get_value_schema_id(&self, store_name: &str, schema: &str) -> Result<Option<i32>> {
        self.schema_data(store_name)
            .await?
            .schema_id(schema)
            .map_err(|e| MetadataError::invalid_schema(store_name, e.to_string()))
    }

    /// Value schema matching `schema` by content
    pub async fn find_value_schema(&self, store_name: &str, schema: &str) -> Result<Option<SchemaEntry>> {
        let data = self.schema_data(store_name).await?;
        let id = data
            .schema_id(schema)
            .map_err(|e| MetadataError::invalid_schema(store_name, e.to_string()))?;
        Ok(id.and_then(|id| data.value_schema(id).cloned()))
    }

    /// All value schemas of a store, ordered by id
    pub async fn get_value_schemas(&self, store_name: &str) -> Result<Vec<SchemaEntry>> {
        Ok(self
            .schema_data(store_name)
            .await?
            .value_schemas()
            .cloned()
            .collect())
    }

    /// The store's superset value schema, or its highest-id value schema
    ///
    /// A superset id that is not in the schema set falls back to the highest
    /// id as well. A store without value schemas fails with `NoLatestSchema`.
    pub async fn get_superset_or_latest_value_schema(&self, store_name: &str) -> Result<SchemaEntry> {
        let store = self.subscribed_store(store_name)?;
        let data = self.schema_data(store_name).await?;

        if let Some(superset) = store.superset_schema_id().and_then(|id| data.value_schema(id)) {
            return Ok(superset.clone());
        }

        data.max_value_schema_id()
            .and_then(|id| data.value_schema(id))
            .cloned()
            .ok_or_else(|| MetadataError::NoLatestSchema(store_name.to_string()))
    }

    /// The store's explicit superset value schema, if any
    pub async fn get_superset_schema(&self, store_name: &str) -> Result<Option<SchemaEntry>> {
        let store = self.subscribed_store(store_name)?;
        let Some(id) = store.superset_schema_id() else {
            return Ok(None);
        };
        Ok(self.schema_data(store_name).await?.value_schema(id).cloned())
    }

    pub fn get_derived_schema_id(&self, _store_name: &str, _schema: &str) -> Result<i32> {
        Err(MetadataError::Unsupported("get_derived_schema_id"))
    }

    pub fn get_derived_schema(&self, _store_name: &str, _value_schema_id: i32, _derived_schema_id: i32) -> Result<SchemaEntry> {
        Err(MetadataError::Unsupported("get_derived_schema"))
    }

    pub fn get_derived_schemas(&self, _store_name: &str) -> Result<Vec<SchemaEntry>> {
        Err(MetadataError::Unsupported("get_derived_schemas"))
    }

    pub fn get_latest_derived_schema(&self, _store_name: &str, _value_schema_id: i32) -> Result<SchemaEntry> {
        Err(MetadataError::Unsupported("get_latest_derived_schema"))
    }

    pub fn get_replication_metadata_schema(
        &self,
        _store_name: &str,
        _value_schema_id: i32,
        _protocol_version: i32,
    ) -> Result<SchemaEntry> {
        Err(MetadataError::Unsupported("get_replication_metadata_schema"))
    }

    pub fn get_replication_metadata_schemas(&self, _store_name: &str) -> Result<Vec<SchemaEntry>> {
        Err(MetadataError::Unsupported("get_replication_metadata_schemas"))
    }
}
