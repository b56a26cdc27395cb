//! In-memory fetch strategy
//!
//! Serves metadata from maps held in process. Embedders use it to mirror a
//! catalog they already know; tests use it to script remote behavior
//! (failures, latency) and to count remote calls.

use crate::fetcher::MetadataFetcher;
use async_trait::async_trait;
use dashmap::DashMap;
use metacache_common::{FetchError, FetchResult, SchemaData, Store, StoreConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Fetch strategy backed by in-memory maps
#[derive(Default)]
pub struct InMemoryFetcher {
    store_configs: DashMap<String, StoreConfig>,
    stores: DashMap<String, Store>,
    schemas: DashMap<String, SchemaData>,
    /// Injected failures, applied to every fetch for the store
    failures: DashMap<String, FetchError>,
    latency: Option<Duration>,
    config_fetches: AtomicUsize,
    store_fetches: AtomicUsize,
    schema_fetches: AtomicUsize,
}

impl InMemoryFetcher {
    /// Create an empty fetcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Publish a store hosted on `cluster`, with an empty schema set if none exists
    pub fn put_store(&self, store: Store, cluster: &str) {
        let name = store.name.clone();
        self.store_configs
            .insert(name.clone(), StoreConfig::new(name.clone(), cluster));
        self.schemas
            .entry(name.clone())
            .or_insert_with(|| SchemaData::new(name.clone()));
        self.stores.insert(name, store);
    }

    /// Replace a published store record, keeping its placement
    pub fn update_store(&self, store: Store) {
        self.stores.insert(store.name.clone(), store);
    }

    /// Replace the placement record of a store
    pub fn put_store_config(&self, config: StoreConfig) {
        self.store_configs.insert(config.store_name.clone(), config);
    }

    /// Publish the schema set of a store
    pub fn put_schemas(&self, schemas: SchemaData) {
        self.schemas.insert(schemas.store_name.clone(), schemas);
    }

    /// Delete a store and everything published for it
    pub fn remove_store(&self, store_name: &str) {
        self.store_configs.remove(store_name);
        self.stores.remove(store_name);
        self.schemas.remove(store_name);
    }

    /// Make every fetch for `store_name` fail with `error`
    pub fn fail_store(&self, store_name: &str, error: FetchError) {
        self.failures.insert(store_name.to_string(), error);
    }

    /// Stop injecting failures for `store_name`
    pub fn heal_store(&self, store_name: &str) {
        self.failures.remove(store_name);
    }

    /// Number of placement fetches served
    pub fn config_fetches(&self) -> usize {
        self.config_fetches.load(Ordering::SeqCst)
    }

    /// Number of store record fetches served
    pub fn store_fetches(&self) -> usize {
        self.store_fetches.load(Ordering::SeqCst)
    }

    /// Number of schema set fetches served
    pub fn schema_fetches(&self) -> usize {
        self.schema_fetches.load(Ordering::SeqCst)
    }

    async fn before_fetch(&self, store_name: &str, counter: &AtomicUsize) -> FetchResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.failures.get(store_name) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MetadataFetcher for InMemoryFetcher {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn fetch_store_config(&self, store_name: &str) -> FetchResult<Option<StoreConfig>> {
        self.before_fetch(store_name, &self.config_fetches).await?;
        Ok(self.store_configs.get(store_name).map(|c| c.clone()))
    }

    async fn fetch_store(&self, store_name: &str, cluster_name: &str) -> FetchResult<Store> {
        self.before_fetch(store_name, &self.store_fetches).await?;
        let hosted_here = self
            .store_configs
            .get(store_name)
            .is_some_and(|c| c.cluster == cluster_name);
        if !hosted_here {
            return Err(FetchError::NotFound(store_name.to_string()));
        }
        self.stores
            .get(store_name)
            .map(|s| s.clone())
            .ok_or_else(|| FetchError::NotFound(store_name.to_string()))
    }

    async fn fetch_schema_data(&self, store_name: &str) -> FetchResult<SchemaData> {
        self.before_fetch(store_name, &self.schema_fetches).await?;
        self.schemas
            .get(store_name)
            .map(|s| s.clone())
            .ok_or_else(|| FetchError::NotFound(store_name.to_string()))
    }
}
