//! Subscription-based store metadata repository
//!
//! Holds three concurrent maps (store records, placement records, schema
//! sets) plus the aggregate read quota of every subscribed store. Callers
//! read from the maps; a background task and explicit refresh calls write to
//! them. No lock is ever held across a remote fetch.

use crate::error::{MetadataError, Result};
use crate::fetcher::MetadataFetcher;
use crate::lifecycle::{Lifecycle, LifecycleState, PeriodicRefresh, RefreshTask};
use crate::listener::{ListenerRegistry, StoreDataChangedListener, StoreEvent};
use crate::stats::{Clock, NoopStats, RepositoryStats, SystemClock};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metacache_common::{regular_store_name, FetchError, RepositoryConfig, SchemaData, Store, StoreConfig};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a full cache refresh
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Stores refreshed successfully
    pub refreshed: usize,
    /// Stores whose refresh failed transiently (left as they were)
    pub failed: usize,
    /// Stores found deleted upstream and dropped from the cache
    pub removed: usize,
    /// Stores unsubscribed while their refresh was in flight
    pub skipped: usize,
}

/// Whether a refresh may add a store that is not currently subscribed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InstallMode {
    /// Explicit subscribe or refresh: insert or replace
    Upsert,
    /// Background sweep: replace only, so a store unsubscribed mid-sweep stays gone
    ReplaceOnly,
}

/// Read-only, subscription-based store metadata cache
pub struct MetadataRepository {
    config: RepositoryConfig,
    pub(crate) fetcher: Arc<dyn MetadataFetcher>,
    stats: Arc<dyn RepositoryStats>,
    clock: Arc<dyn Clock>,
    /// Subscribed store name -> store record
    pub(crate) subscribed_stores: DashMap<String, Arc<Store>>,
    /// Store name -> placement record
    pub(crate) store_configs: DashMap<String, StoreConfig>,
    /// Store name -> schema set
    pub(crate) schemas: DashMap<String, Arc<SchemaData>>,
    /// Sum of read quotas of subscribed stores
    total_read_quota: AtomicI64,
    listeners: ListenerRegistry,
    pub(crate) lifecycle: Lifecycle,
}

fn quota(store: &Store) -> i64 {
    i64::try_from(store.read_quota_in_cu).unwrap_or(i64::MAX)
}

impl MetadataRepository {
    /// Create a repository using the given fetch strategy
    pub fn new(config: RepositoryConfig, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        info!("Initializing metadata repository with {} fetcher", fetcher.name());
        Self {
            config,
            fetcher,
            stats: Arc::new(NoopStats),
            clock: Arc::new(SystemClock),
            subscribed_stores: DashMap::new(),
            store_configs: DashMap::new(),
            schemas: DashMap::new(),
            total_read_quota: AtomicI64::new(0),
            listeners: ListenerRegistry::new(),
            lifecycle: Lifecycle::new(),
        }
    }

    /// Report cache refreshes to `stats`
    pub fn with_stats(mut self, stats: Arc<dyn RepositoryStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Use `clock` for cache refresh timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Repository configuration
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    // =========== Lifecycle ===========

    /// Start the periodic refresh; a no-op if already started
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let period = self.config.refresh_interval();
        let started = self
            .lifecycle
            .start(|| RefreshTask::spawn(Arc::downgrade(self), period))?;
        if started {
            info!("Metadata repository started, refreshing every {:?}", period);
        }
        Ok(())
    }

    /// Stop the periodic refresh and drop all cached metadata
    ///
    /// Waits up to the configured grace period for an in-flight refresh,
    /// then aborts it. Every store still subscribed is reported to the
    /// deletion listeners. The repository cannot be started again.
    pub async fn clear(&self) -> Result<()> {
        if let Some(task) = self.lifecycle.begin_clear()? {
            task.shutdown(self.config.shutdown_grace()).await;
        }

        let names: Vec<String> = self
            .subscribed_stores
            .iter()
            .map(|e| e.key().clone())
            .collect();
        for name in &names {
            self.remove_store(name);
        }

        self.subscribed_stores.clear();
        self.store_configs.clear();
        self.schemas.clear();
        self.total_read_quota.store(0, Ordering::SeqCst);

        info!("Metadata repository cleared ({} stores dropped)", names.len());
        Ok(())
    }

    // =========== Subscription ===========

    /// Subscribe to a store, fetching its metadata if not yet cached
    pub async fn subscribe(&self, store_name: &str) -> Result<()> {
        self.lifecycle.ensure_usable()?;
        if !self.subscribed_stores.contains_key(store_name) {
            self.refresh_one_store(store_name).await?;
            info!("Subscribed to store {}", store_name);
        }
        Ok(())
    }

    /// Drop a store and its schemas and placement from the cache
    pub fn unsubscribe(&self, store_name: &str) {
        if self.remove_store(store_name).is_some() {
            info!("Unsubscribed from store {}", store_name);
        }
    }

    // =========== Store reads ===========

    /// Copy of the cached store record, or `None` if not subscribed
    pub fn get_store(&self, store_name: &str) -> Result<Option<Store>> {
        self.lifecycle.ensure_usable()?;
        Ok(self
            .subscribed_stores
            .get(store_name)
            .map(|s| Store::clone(&s)))
    }

    /// Copy of the cached store record, failing if not subscribed
    pub fn get_store_or_fail(&self, store_name: &str) -> Result<Store> {
        self.get_store(store_name)?
            .ok_or_else(|| MetadataError::no_such_store(store_name))
    }

    /// Whether the store is subscribed
    pub fn has_store(&self, store_name: &str) -> Result<bool> {
        self.lifecycle.ensure_usable()?;
        Ok(self.subscribed_stores.contains_key(store_name))
    }

    /// All subscribed store records, shared rather than copied
    pub fn get_all_stores(&self) -> Result<Vec<Arc<Store>>> {
        self.lifecycle.ensure_usable()?;
        Ok(self
            .subscribed_stores
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect())
    }

    /// Sum of the read quotas of all subscribed stores
    pub fn get_total_store_read_quota(&self) -> Result<u64> {
        self.lifecycle.ensure_usable()?;
        Ok(u64::try_from(self.total_read_quota.load(Ordering::SeqCst)).unwrap_or(0))
    }

    /// Batch-get limit of a subscribed store
    pub fn get_batch_get_limit(&self, store_name: &str) -> Result<i32> {
        Ok(self.subscribed_store(store_name)?.batch_get_limit)
    }

    /// Whether read computation is enabled for a subscribed store
    pub fn is_read_computation_enabled(&self, store_name: &str) -> Result<bool> {
        Ok(self.subscribed_store(store_name)?.read_computation_enabled)
    }

    /// Cluster hosting a store, from the cached placement record
    ///
    /// System store names resolve through their regular store.
    pub fn resolve_cluster(&self, store_name: &str) -> Result<Option<String>> {
        self.lifecycle.ensure_usable()?;
        Ok(self
            .store_configs
            .get(regular_store_name(store_name))
            .map(|c| c.cluster.clone()))
    }

    pub(crate) fn subscribed_store(&self, store_name: &str) -> Result<Arc<Store>> {
        self.lifecycle.ensure_usable()?;
        self.subscribed_stores
            .get(store_name)
            .map(|s| Arc::clone(&s))
            .ok_or_else(|| MetadataError::no_such_store(store_name))
    }

    // =========== Listeners ===========

    /// Register a store change listener; returns false if already registered
    pub fn register_store_data_changed_listener(
        &self,
        listener: Arc<dyn StoreDataChangedListener>,
    ) -> bool {
        self.listeners.register(listener)
    }

    /// Unregister a store change listener; returns false if not registered
    pub fn unregister_store_data_changed_listener(
        &self,
        listener: &Arc<dyn StoreDataChangedListener>,
    ) -> bool {
        self.listeners.unregister(listener)
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // =========== Refresh ===========

    /// Refresh one store: placement, then store record, then schemas
    ///
    /// Deleted or missing stores fail with `NoSuchStore`; other fetch
    /// failures are `Transient`.
    pub async fn refresh_one_store(&self, store_name: &str) -> Result<Store> {
        self.lifecycle.ensure_usable()?;
        let installed = self
            .refresh_store(store_name, InstallMode::Upsert)
            .await?
            .ok_or_else(|| MetadataError::no_such_store(store_name))?;
        Ok(Store::clone(&installed))
    }

    /// Refresh every subscribed store, isolating per-store failures
    pub async fn refresh(&self) -> Result<RefreshSummary> {
        self.lifecycle.ensure_usable()?;
        debug!("Refresh started for metadata repository");

        let names: Vec<String> = self
            .subscribed_stores
            .iter()
            .map(|e| e.key().clone())
            .collect();

        let mut summary = RefreshSummary::default();
        for name in names {
            match self.refresh_store(&name, InstallMode::ReplaceOnly).await {
                Ok(Some(_)) => summary.refreshed += 1,
                Ok(None) => summary.skipped += 1,
                Err(e) if e.is_no_such_store() => {
                    warn!("Store {} no longer exists, dropping it from the cache: {}", name, e);
                    self.remove_store(&name);
                    summary.removed += 1;
                }
                Err(e) => {
                    // Left as-is until the next cycle retries it.
                    warn!("Caught an error when refreshing store {}: {}", name, e);
                    summary.failed += 1;
                }
            }
        }

        debug!(
            "Refresh finished for metadata repository: {} refreshed, {} failed, {} removed, {} skipped",
            summary.refreshed, summary.failed, summary.removed, summary.skipped
        );
        Ok(summary)
    }

    /// Returns `None` if a sweep found the store unsubscribed mid-refresh
    async fn refresh_store(&self, store_name: &str, mode: InstallMode) -> Result<Option<Arc<Store>>> {
        let config = self.fetch_store_config(store_name).await?;

        let store = self
            .fetcher
            .fetch_store(store_name, &config.cluster)
            .await
            .map_err(|e| MetadataError::from_fetch(store_name, e))?;
        if store.name != store_name {
            return Err(MetadataError::Transient {
                store: store_name.to_string(),
                source: FetchError::deserialization(format!(
                    "requested store {} but received {}",
                    store_name, store.name
                )),
            });
        }

        let Some(installed) = self.put_store(config, store, mode)? else {
            debug!("Store {} was unsubscribed during refresh, not reinstalling it", store_name);
            return Ok(None);
        };

        self.fetch_and_cache_schema_data(store_name).await?;
        self.stats
            .on_cache_refreshed(store_name, self.clock.now_millis());
        Ok(Some(installed))
    }

    /// Fetch the placement record of a store, rejecting deleted stores
    async fn fetch_store_config(&self, store_name: &str) -> Result<StoreConfig> {
        let config = self
            .fetcher
            .fetch_store_config(store_name)
            .await
            .map_err(|e| MetadataError::from_fetch(store_name, e))?
            .ok_or_else(|| {
                warn!("Store config is missing unexpectedly for store {}", store_name);
                MetadataError::no_such_store(store_name)
            })?;

        if config.deleting {
            return Err(MetadataError::NoSuchStore {
                store: store_name.to_string(),
                source: Some(FetchError::NotFound(format!("{store_name} is being deleted"))),
            });
        }

        Ok(config)
    }

    // =========== Cache state ===========

    /// Install a store record and its placement, replacing any previous
    /// record wholesale
    ///
    /// Listeners hear about the record only if it differs from the cached
    /// one; a brand-new record counts as a change. Returns the installed
    /// record, or `None` in `ReplaceOnly` mode when the store is not
    /// subscribed. Fails with `Cleared` once `clear()` has begun.
    fn put_store(&self, config: StoreConfig, mut store: Store, mode: InstallMode) -> Result<Option<Arc<Store>>> {
        store.fix_missing_fields();
        let store = Arc::new(store);

        // Held through the notification so `clear()` waits for it.
        let _state = self.lifecycle.install_guard()?;

        // Placement is written under the record's entry guard, which
        // `remove_store` must take first. The guard is released before
        // listeners run.
        let previous = match self.subscribed_stores.entry(store.name.clone()) {
            Entry::Occupied(mut entry) => {
                self.store_configs.insert(store.name.clone(), config);
                Some(entry.insert(Arc::clone(&store)))
            }
            Entry::Vacant(entry) => {
                if mode == InstallMode::ReplaceOnly {
                    return Ok(None);
                }
                self.store_configs.insert(store.name.clone(), config);
                entry.insert(Arc::clone(&store));
                None
            }
        };

        if previous.as_deref() != Some(&*store) {
            self.add_read_quota(quota(&store) - previous.as_deref().map_or(0, quota));
            self.listeners.notify(StoreEvent::Changed, &store);
        }

        Ok(Some(store))
    }

    /// Apply a delta to the aggregate read quota, saturating at the bounds
    fn add_read_quota(&self, delta: i64) {
        let _ = self
            .total_read_quota
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
                Some(total.saturating_add(delta))
            });
    }

    /// Remove a store record, its schemas, and its placement
    fn remove_store(&self, store_name: &str) -> Option<Arc<Store>> {
        let removed = self.subscribed_stores.remove(store_name).map(|(_, s)| s);
        self.stats.on_cache_entry_removed(store_name);

        if let Some(store) = &removed {
            self.add_read_quota(-quota(store));
            self.listeners.notify(StoreEvent::Deleted, store);
        }

        self.schemas.remove(store_name);
        self.store_configs.remove(store_name);
        removed
    }
}

#[async_trait]
impl PeriodicRefresh for MetadataRepository {
    async fn periodic_refresh(&self) {
        if let Err(e) = self.refresh().await {
            debug!("Skipping periodic refresh: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerResult;
    use crate::memory::InMemoryFetcher;
    use crate::stats::StalenessStats;
    use metacache_common::{SchemaEntry, SystemStoreType};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        changed: AtomicUsize,
        deleted: AtomicUsize,
    }

    impl StoreDataChangedListener for Recorder {
        fn handle_store_changed(&self, _store: &Store) -> ListenerResult {
            self.changed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn handle_store_deleted(&self, _store: &Store) -> ListenerResult {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Broken;

    impl StoreDataChangedListener for Broken {
        fn handle_store_changed(&self, _store: &Store) -> ListenerResult {
            Err("broken listener".into())
        }
    }

    fn publish(fetcher: &InMemoryFetcher, name: &str, quota: u64) {
        fetcher.put_store(Store::new(name).with_read_quota(quota), "cluster-a");
        fetcher.put_schemas(
            SchemaData::new(name)
                .with_key_schema(SchemaEntry::new(1, "\"string\""))
                .with_value_schema(SchemaEntry::new(1, "\"int\""))
                .with_value_schema(SchemaEntry::new(2, "\"long\"")),
        );
    }

    fn placement(name: &str) -> StoreConfig {
        StoreConfig::new(name, "cluster-a")
    }

    fn started_repository(fetcher: &Arc<InMemoryFetcher>) -> Arc<MetadataRepository> {
        let config = RepositoryConfig::default().with_shutdown_grace_secs(1);
        let repo = Arc::new(MetadataRepository::new(config, fetcher.clone()));
        repo.start().unwrap();
        repo
    }

    fn quota_sum(repo: &MetadataRepository) -> u64 {
        repo.get_all_stores()
            .unwrap()
            .iter()
            .map(|s| s.read_quota_in_cu)
            .sum()
    }

    #[tokio::test]
    async fn test_subscribe_populates_cache() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        publish(&fetcher, "orders", 100);
        let repo = started_repository(&fetcher);

        repo.subscribe("orders").await.unwrap();

        assert!(repo.has_store("orders").unwrap());
        assert_eq!(repo.get_store_or_fail("orders").unwrap().read_quota_in_cu, 100);
        assert_eq!(repo.resolve_cluster("orders").unwrap().as_deref(), Some("cluster-a"));
        assert!(repo.schemas.contains_key("orders"));
        assert_eq!(repo.get_total_store_read_quota().unwrap(), 100);

        // Already subscribed: no further remote calls.
        let fetches = fetcher.store_fetches();
        repo.subscribe("orders").await.unwrap();
        assert_eq!(fetcher.store_fetches(), fetches);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_store() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        let repo = started_repository(&fetcher);

        let err = repo.subscribe("missing").await.unwrap_err();
        assert!(err.is_no_such_store());
        assert!(!repo.has_store("missing").unwrap());
        assert!(repo.get_store("missing").unwrap().is_none());
        assert!(repo.get_store_or_fail("missing").unwrap_err().is_no_such_store());
    }

    #[tokio::test]
    async fn test_subscribe_deleting_store() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        publish(&fetcher, "orders", 1);
        fetcher.put_store_config(StoreConfig::new("orders", "cluster-a").with_deleting(true));
        let repo = started_repository(&fetcher);

        assert!(repo.subscribe("orders").await.unwrap_err().is_no_such_store());
        assert_eq!(fetcher.store_fetches(), 0);
    }

    #[tokio::test]
    async fn test_not_found_causes_map_to_no_such_store() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        publish(&fetcher, "a", 1);
        publish(&fetcher, "b", 1);
        fetcher.fail_store("a", FetchError::ServiceDiscovery("a".into()));
        fetcher.fail_store(
            "b",
            FetchError::MissingKey {
                store: "b".into(),
                key: "store_properties".into(),
            },
        );
        let repo = started_repository(&fetcher);

        assert!(repo.subscribe("a").await.unwrap_err().is_no_such_store());
        assert!(repo.subscribe("b").await.unwrap_err().is_no_such_store());
    }

    #[tokio::test]
    async fn test_subscribe_transient_failure() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        publish(&fetcher, "orders", 1);
        fetcher.fail_store("orders", FetchError::unavailable("router down"));
        let repo = started_repository(&fetcher);

        let err = repo.subscribe("orders").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!repo.has_store("orders").unwrap());

        fetcher.heal_store("orders");
        repo.subscribe("orders").await.unwrap();
        assert!(repo.has_store("orders").unwrap());
    }

    #[tokio::test]
    async fn test_quota_invariant_across_updates() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        publish(&fetcher, "a", 10);
        publish(&fetcher, "b", 20);
        publish(&fetcher, "c", 30);
        let repo = started_repository(&fetcher);

        for name in ["a", "b", "c"] {
            repo.subscribe(name).await.unwrap();
        }
        assert_eq!(repo.get_total_store_read_quota().unwrap(), 60);

        fetcher.update_store(Store::new("b").with_read_quota(5));
        repo.refresh_one_store("b").await.unwrap();
        assert_eq!(repo.get_total_store_read_quota().unwrap(), 45);
        assert_eq!(repo.get_total_store_read_quota().unwrap(), quota_sum(&repo));

        repo.unsubscribe("a");
        assert_eq!(repo.get_total_store_read_quota().unwrap(), 35);
        assert_eq!(repo.get_total_store_read_quota().unwrap(), quota_sum(&repo));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_quota_invariant_under_concurrent_puts() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        let repo = started_repository(&fetcher);

        let mut tasks = Vec::new();
        for worker in 0..8u64 {
            let repo = Arc::clone(&repo);
            tasks.push(tokio::spawn(async move {
                for i in 0..50u64 {
                    let name = format!("store-{worker}-{}", i % 10);
                    repo.put_store(
                        placement(&name),
                        Store::new(name.clone()).with_read_quota(worker * 100 + i),
                        InstallMode::Upsert,
                    )
                    .unwrap();
                    if i % 7 == 0 {
                        repo.remove_store(&name);
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(repo.get_total_store_read_quota().unwrap(), quota_sum(&repo));
    }

    #[tokio::test]
    async fn test_identical_refresh_notifies_once() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        publish(&fetcher, "orders", 7);
        let repo = started_repository(&fetcher);
        let recorder = Arc::new(Recorder::default());
        repo.register_store_data_changed_listener(recorder.clone());

        let seven = || Store::new("orders").with_read_quota(7);
        repo.put_store(placement("orders"), seven(), InstallMode::Upsert).unwrap();
        repo.put_store(placement("orders"), seven(), InstallMode::Upsert).unwrap();
        assert_eq!(recorder.changed.load(Ordering::SeqCst), 1);

        repo.refresh_one_store("orders").await.unwrap();
        assert_eq!(recorder.changed.load(Ordering::SeqCst), 1);

        fetcher.update_store(Store::new("orders").with_read_quota(8));
        repo.refresh_one_store("orders").await.unwrap();
        assert_eq!(recorder.changed.load(Ordering::SeqCst), 2);
        assert_eq!(repo.get_total_store_read_quota().unwrap(), 8);
    }

    #[tokio::test]
    async fn test_broken_listener_does_not_block_updates() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        publish(&fetcher, "orders", 7);
        let repo = started_repository(&fetcher);
        let recorder = Arc::new(Recorder::default());
        repo.register_store_data_changed_listener(Arc::new(Broken));
        repo.register_store_data_changed_listener(recorder.clone());
        assert_eq!(repo.listener_count(), 2);

        repo.subscribe("orders").await.unwrap();
        assert!(repo.has_store("orders").unwrap());
        assert_eq!(recorder.changed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_cleans_up() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        publish(&fetcher, "orders", 40);
        publish(&fetcher, "users", 2);
        let stats = Arc::new(StalenessStats::default());
        let repo = Arc::new(
            MetadataRepository::new(RepositoryConfig::default(), fetcher.clone())
                .with_stats(stats.clone()),
        );
        repo.start().unwrap();
        let recorder = Arc::new(Recorder::default());
        repo.register_store_data_changed_listener(recorder.clone());

        repo.subscribe("orders").await.unwrap();
        repo.subscribe("users").await.unwrap();
        assert!(stats.last_refreshed("orders").is_some());

        repo.unsubscribe("orders");

        assert!(!repo.has_store("orders").unwrap());
        assert!(!repo.schemas.contains_key("orders"));
        assert!(repo.resolve_cluster("orders").unwrap().is_none());
        assert_eq!(repo.get_total_store_read_quota().unwrap(), 2);
        assert_eq!(recorder.deleted.load(Ordering::SeqCst), 1);
        assert!(stats.last_refreshed("orders").is_none());

        // Unknown names are a no-op.
        repo.unsubscribe("never-subscribed");
        assert_eq!(recorder.deleted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sweep_isolates_failures() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        for name in ["first", "second", "third"] {
            publish(&fetcher, name, 1);
        }
        let repo = started_repository(&fetcher);
        for name in ["first", "second", "third"] {
            repo.subscribe(name).await.unwrap();
        }

        for name in ["first", "second", "third"] {
            fetcher.update_store(Store::new(name).with_read_quota(9));
        }
        fetcher.fail_store("second", FetchError::Timeout);

        let summary = repo.refresh().await.unwrap();
        assert_eq!(summary.refreshed, 2);
        assert_eq!(summary.failed, 1);

        assert_eq!(repo.get_store_or_fail("first").unwrap().read_quota_in_cu, 9);
        assert_eq!(repo.get_store_or_fail("second").unwrap().read_quota_in_cu, 1);
        assert_eq!(repo.get_store_or_fail("third").unwrap().read_quota_in_cu, 9);
        assert_eq!(repo.get_total_store_read_quota().unwrap(), 19);
    }

    #[tokio::test]
    async fn test_sweep_drops_deleted_store() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        publish(&fetcher, "orders", 3);
        publish(&fetcher, "users", 4);
        let repo = started_repository(&fetcher);
        let recorder = Arc::new(Recorder::default());
        repo.register_store_data_changed_listener(recorder.clone());
        repo.subscribe("orders").await.unwrap();
        repo.subscribe("users").await.unwrap();

        fetcher.remove_store("orders");
        let summary = repo.refresh().await.unwrap();

        assert_eq!(summary.removed, 1);
        assert_eq!(summary.refreshed, 1);
        assert!(!repo.has_store("orders").unwrap());
        assert!(!repo.schemas.contains_key("orders"));
        assert_eq!(recorder.deleted.load(Ordering::SeqCst), 1);
        assert_eq!(repo.get_total_store_read_quota().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_sweep_does_not_resurrect_unsubscribed_store() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        publish(&fetcher, "orders", 3);
        let repo = started_repository(&fetcher);
        repo.subscribe("orders").await.unwrap();
        repo.unsubscribe("orders");

        let installed = repo
            .put_store(
                placement("orders"),
                Store::new("orders").with_read_quota(3),
                InstallMode::ReplaceOnly,
            )
            .unwrap();

        assert!(installed.is_none());
        assert!(!repo.has_store("orders").unwrap());
        assert!(repo.resolve_cluster("orders").unwrap().is_none());
        assert_eq!(repo.get_total_store_read_quota().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_during_sweep_drops_placement() {
        let fetcher = Arc::new(InMemoryFetcher::new().with_latency(Duration::from_secs(5)));
        publish(&fetcher, "orders", 3);
        let repo = Arc::new(MetadataRepository::new(
            RepositoryConfig::default().with_refresh_interval_secs(3600),
            fetcher.clone(),
        ));
        repo.start().unwrap();
        repo.subscribe("orders").await.unwrap();

        let sweep = {
            let repo = Arc::clone(&repo);
            tokio::spawn(async move { repo.refresh().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        repo.unsubscribe("orders");

        let summary = sweep.await.unwrap().unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(!repo.has_store("orders").unwrap());
        assert!(repo.resolve_cluster("orders").unwrap().is_none());
        assert!(!repo.schemas.contains_key("orders"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_racing_clear_installs_nothing() {
        let fetcher = Arc::new(InMemoryFetcher::new().with_latency(Duration::from_secs(5)));
        publish(&fetcher, "orders", 42);
        let repo = Arc::new(MetadataRepository::new(
            RepositoryConfig::default().with_refresh_interval_secs(3600),
            fetcher.clone(),
        ));
        let recorder = Arc::new(Recorder::default());
        repo.register_store_data_changed_listener(recorder.clone());
        repo.start().unwrap();

        let subscribing = {
            let repo = Arc::clone(&repo);
            tokio::spawn(async move { repo.subscribe("orders").await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        repo.clear().await.unwrap();

        let err = subscribing.await.unwrap().unwrap_err();
        assert!(matches!(err, MetadataError::Cleared));
        assert_eq!(repo.state(), LifecycleState::Cleared);
        assert!(repo.subscribed_stores.is_empty());
        assert!(repo.store_configs.is_empty());
        assert!(repo.schemas.is_empty());
        assert_eq!(repo.total_read_quota.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.changed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_total_quota_saturates() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        let repo = started_repository(&fetcher);

        for name in ["huge-a", "huge-b"] {
            repo.put_store(
                placement(name),
                Store::new(name).with_read_quota(u64::MAX),
                InstallMode::Upsert,
            )
            .unwrap();
        }

        assert_eq!(
            repo.get_total_store_read_quota().unwrap(),
            u64::try_from(i64::MAX).unwrap()
        );
    }

    #[tokio::test]
    async fn test_get_returns_isolated_copy() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        publish(&fetcher, "orders", 5);
        let repo = started_repository(&fetcher);
        repo.subscribe("orders").await.unwrap();

        let mut copy = repo.get_store("orders").unwrap().unwrap();
        copy.read_quota_in_cu = 999;
        copy.batch_get_limit = 1;

        let again = repo.get_store("orders").unwrap().unwrap();
        assert_eq!(again.read_quota_in_cu, 5);
        assert_ne!(again.batch_get_limit, 1);
    }

    #[tokio::test]
    async fn test_store_accessors() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        fetcher.put_store(
            Store::new("orders")
                .with_batch_get_limit(42)
                .with_read_computation(true),
            "cluster-a",
        );
        let repo = started_repository(&fetcher);
        repo.subscribe("orders").await.unwrap();

        assert_eq!(repo.get_batch_get_limit("orders").unwrap(), 42);
        assert!(repo.is_read_computation_enabled("orders").unwrap());
        assert!(repo.get_batch_get_limit("missing").unwrap_err().is_no_such_store());
    }

    #[tokio::test]
    async fn test_missing_fields_fixed_on_install() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        let mut legacy = Store::new("legacy");
        legacy.partitioner_config = None;
        legacy.batch_get_limit = -1;
        fetcher.put_store(legacy, "cluster-a");
        let repo = started_repository(&fetcher);

        repo.subscribe("legacy").await.unwrap();

        let store = repo.get_store_or_fail("legacy").unwrap();
        assert!(store.partitioner_config.is_some());
        assert!(store.batch_get_limit > 0);
    }

    #[tokio::test]
    async fn test_resolve_cluster_for_system_store() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        publish(&fetcher, "orders", 1);
        let repo = started_repository(&fetcher);
        repo.subscribe("orders").await.unwrap();

        let meta_store = SystemStoreType::MetaStore.system_store_name("orders");
        assert_eq!(
            repo.resolve_cluster(&meta_store).unwrap().as_deref(),
            Some("cluster-a")
        );
        assert!(repo.resolve_cluster("unknown").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_gating() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        publish(&fetcher, "orders", 1);
        let repo = Arc::new(MetadataRepository::new(
            RepositoryConfig::default().with_shutdown_grace_secs(1),
            fetcher.clone(),
        ));

        assert_eq!(repo.state(), LifecycleState::NotStarted);
        assert!(matches!(repo.subscribe("orders").await, Err(MetadataError::NotStarted)));
        assert!(matches!(repo.get_store("orders"), Err(MetadataError::NotStarted)));
        assert!(matches!(repo.has_store("orders"), Err(MetadataError::NotStarted)));
        assert!(matches!(repo.get_key_schema("orders").await, Err(MetadataError::NotStarted)));

        repo.start().unwrap();
        repo.start().unwrap();
        assert_eq!(repo.state(), LifecycleState::Started);
        repo.subscribe("orders").await.unwrap();

        repo.clear().await.unwrap();
        assert_eq!(repo.state(), LifecycleState::Cleared);
        assert!(matches!(repo.subscribe("orders").await, Err(MetadataError::Cleared)));
        assert!(matches!(repo.get_all_stores(), Err(MetadataError::Cleared)));
        assert!(matches!(repo.refresh().await, Err(MetadataError::Cleared)));
        assert!(matches!(repo.start(), Err(MetadataError::AlreadyCleared)));
        assert!(matches!(repo.clear().await, Err(MetadataError::Cleared)));
        assert_eq!(repo.state(), LifecycleState::Cleared);
    }

    #[tokio::test]
    async fn test_clear_wipes_cache_and_notifies_deletions() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        publish(&fetcher, "a", 1);
        publish(&fetcher, "b", 2);
        let repo = started_repository(&fetcher);
        let recorder = Arc::new(Recorder::default());
        repo.register_store_data_changed_listener(recorder.clone());
        repo.subscribe("a").await.unwrap();
        repo.subscribe("b").await.unwrap();

        repo.clear().await.unwrap();

        assert_eq!(recorder.deleted.load(Ordering::SeqCst), 2);
        assert!(repo.subscribed_stores.is_empty());
        assert!(repo.store_configs.is_empty());
        assert!(repo.schemas.is_empty());
        assert_eq!(repo.total_read_quota.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_refresh_picks_up_changes() {
        let fetcher = Arc::new(InMemoryFetcher::new());
        publish(&fetcher, "orders", 1);
        let repo = Arc::new(MetadataRepository::new(
            RepositoryConfig::default().with_refresh_interval_secs(10),
            fetcher.clone(),
        ));
        repo.start().unwrap();
        repo.subscribe("orders").await.unwrap();

        fetcher.update_store(Store::new("orders").with_read_quota(50));
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(repo.get_store_or_fail("orders").unwrap().read_quota_in_cu, 50);
        repo.clear().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_aborts_stuck_refresh() {
        let fetcher = Arc::new(InMemoryFetcher::new().with_latency(Duration::from_secs(3600)));
        publish(&fetcher, "orders", 1);
        let repo = Arc::new(MetadataRepository::new(
            RepositoryConfig::default()
                .with_refresh_interval_secs(10)
                .with_shutdown_grace_secs(2),
            fetcher.clone(),
        ));
        repo.start().unwrap();
        repo.subscribe("orders").await.unwrap();

        // The next sweep stalls inside a remote fetch.
        tokio::time::sleep(Duration::from_secs(11)).await;

        repo.clear().await.unwrap();
        assert_eq!(repo.state(), LifecycleState::Cleared);
        assert!(repo.subscribed_stores.is_empty());
        assert_eq!(repo.total_read_quota.load(Ordering::SeqCst), 0);
    }
}
