//! Core type definitions for metacache
//!
//! This module defines the metadata mirrored by the repository: store
//! records, store placement (cluster) records, schema entries and the
//! per-store schema set, plus the naming rules for system stores.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Schema id used when a store has no valid value schema
pub const INVALID_VALUE_SCHEMA_ID: i32 = -1;

/// Batch-get limit applied to store records that predate the field
pub const DEFAULT_BATCH_GET_LIMIT: i32 = 150;

/// Partitioner applied to store records that predate partitioner configs
pub const DEFAULT_PARTITIONER_CLASS: &str = "default";

fn unset_schema_id() -> i32 {
    INVALID_VALUE_SCHEMA_ID
}

fn unset_batch_get_limit() -> i32 {
    -1
}

fn default_true() -> bool {
    true
}

/// How keys of a store are spread across partitions
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionerConfig {
    /// Partitioner implementation name
    pub partitioner_class: String,
    /// Sub-partitions per user partition
    #[serde(default = "default_amplification_factor")]
    pub amplification_factor: u32,
    /// Partitioner-specific parameters
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_amplification_factor() -> u32 {
    1
}

impl Default for PartitionerConfig {
    fn default() -> Self {
        Self {
            partitioner_class: DEFAULT_PARTITIONER_CLASS.to_string(),
            amplification_factor: default_amplification_factor(),
            params: BTreeMap::new(),
        }
    }
}

/// Configuration record of a logical data collection ("store")
///
/// The repository replaces a cached record wholesale on every refresh and
/// hands out clones, so nothing outside the cache can mutate it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    /// Store name (unique key)
    pub name: String,
    /// Owning team or principal
    #[serde(default)]
    pub owner: String,
    /// Current serving version
    #[serde(default)]
    pub current_version: u32,
    /// Number of partitions
    #[serde(default)]
    pub partition_count: u32,
    /// Read quota in capacity units
    #[serde(default)]
    pub read_quota_in_cu: u64,
    /// Storage quota in bytes
    #[serde(default)]
    pub storage_quota_in_byte: u64,
    /// Maximum keys per batch-get request (negative when unset)
    #[serde(default = "unset_batch_get_limit")]
    pub batch_get_limit: i32,
    /// Whether read computation is enabled
    #[serde(default)]
    pub read_computation_enabled: bool,
    /// Whether reads are enabled
    #[serde(default = "default_true")]
    pub enable_reads: bool,
    /// Whether writes are enabled
    #[serde(default = "default_true")]
    pub enable_writes: bool,
    /// Latest superset value schema id, [`INVALID_VALUE_SCHEMA_ID`] if none
    #[serde(default = "unset_schema_id")]
    pub latest_superset_value_schema_id: i32,
    /// Partitioner configuration (absent in records from older producers)
    #[serde(default)]
    pub partitioner_config: Option<PartitionerConfig>,
    /// Creation time (milliseconds since epoch)
    #[serde(default)]
    pub created_time: u64,
}

impl Store {
    /// Create a store record with default configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: String::new(),
            current_version: 0,
            partition_count: 0,
            read_quota_in_cu: 0,
            storage_quota_in_byte: 0,
            batch_get_limit: DEFAULT_BATCH_GET_LIMIT,
            read_computation_enabled: false,
            enable_reads: true,
            enable_writes: true,
            latest_superset_value_schema_id: INVALID_VALUE_SCHEMA_ID,
            partitioner_config: Some(PartitionerConfig::default()),
            created_time: 0,
        }
    }

    /// Set the owner
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Set the read quota
    pub fn with_read_quota(mut self, read_quota_in_cu: u64) -> Self {
        self.read_quota_in_cu = read_quota_in_cu;
        self
    }

    /// Set the current version
    pub fn with_current_version(mut self, version: u32) -> Self {
        self.current_version = version;
        self
    }

    /// Set the batch-get limit
    pub fn with_batch_get_limit(mut self, limit: i32) -> Self {
        self.batch_get_limit = limit;
        self
    }

    /// Enable or disable read computation
    pub fn with_read_computation(mut self, enabled: bool) -> Self {
        self.read_computation_enabled = enabled;
        self
    }

    /// Set the latest superset value schema id
    pub fn with_superset_schema_id(mut self, id: i32) -> Self {
        self.latest_superset_value_schema_id = id;
        self
    }

    /// Superset schema id, if the store designates one
    #[must_use]
    pub fn superset_schema_id(&self) -> Option<i32> {
        (self.latest_superset_value_schema_id != INVALID_VALUE_SCHEMA_ID)
            .then_some(self.latest_superset_value_schema_id)
    }

    /// Fill in fields that records written by older producers leave unset
    pub fn fix_missing_fields(&mut self) {
        if self.partitioner_config.is_none() {
            self.partitioner_config = Some(PartitionerConfig::default());
        }
        if self.batch_get_limit < 0 {
            self.batch_get_limit = DEFAULT_BATCH_GET_LIMIT;
        }
    }
}

/// Placement record: which cluster currently hosts a store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store name
    pub store_name: String,
    /// Cluster currently hosting the store
    pub cluster: String,
    /// Source cluster of an in-flight migration
    #[serde(default)]
    pub migration_src_cluster: Option<String>,
    /// Destination cluster of an in-flight migration
    #[serde(default)]
    pub migration_dest_cluster: Option<String>,
    /// Whether the store is being deleted
    #[serde(default)]
    pub deleting: bool,
}

impl StoreConfig {
    /// Create a placement record
    pub fn new(store_name: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
            cluster: cluster.into(),
            migration_src_cluster: None,
            migration_dest_cluster: None,
            deleting: false,
        }
    }

    /// Mark the store as being deleted
    pub fn with_deleting(mut self, deleting: bool) -> Self {
        self.deleting = deleting;
        self
    }
}

/// Schema text could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid schema: {0}")]
pub struct SchemaParseError(pub String);

/// A key or value schema with its id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntry {
    /// Schema id, unique per store
    pub id: i32,
    /// Schema text (an Avro schema, which is a JSON document)
    pub schema: String,
}

impl SchemaEntry {
    /// Create a schema entry
    pub fn new(id: i32, schema: impl Into<String>) -> Self {
        Self {
            id,
            schema: schema.into(),
        }
    }

    /// Parse the schema text
    pub fn parse(&self) -> Result<serde_json::Value, SchemaParseError> {
        parse_schema(&self.schema)
    }
}

/// Parse schema text into its JSON document form
pub fn parse_schema(schema: &str) -> Result<serde_json::Value, SchemaParseError> {
    serde_json::from_str(schema).map_err(|e| SchemaParseError(e.to_string()))
}

/// Key schema and id-indexed value schemas of a store
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemaData {
    /// Store the schemas belong to
    pub store_name: String,
    key_schema: Option<SchemaEntry>,
    value_schemas: BTreeMap<i32, SchemaEntry>,
}

impl SchemaData {
    /// Create an empty schema set
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
            key_schema: None,
            value_schemas: BTreeMap::new(),
        }
    }

    /// Set the key schema
    pub fn set_key_schema(&mut self, entry: SchemaEntry) {
        self.key_schema = Some(entry);
    }

    /// Add (or replace) a value schema
    pub fn add_value_schema(&mut self, entry: SchemaEntry) {
        self.value_schemas.insert(entry.id, entry);
    }

    /// Builder form of [`Self::set_key_schema`]
    pub fn with_key_schema(mut self, entry: SchemaEntry) -> Self {
        self.set_key_schema(entry);
        self
    }

    /// Builder form of [`Self::add_value_schema`]
    pub fn with_value_schema(mut self, entry: SchemaEntry) -> Self {
        self.add_value_schema(entry);
        self
    }

    /// Key schema, if one is registered
    pub fn key_schema(&self) -> Option<&SchemaEntry> {
        self.key_schema.as_ref()
    }

    /// Value schema by id
    pub fn value_schema(&self, id: i32) -> Option<&SchemaEntry> {
        self.value_schemas.get(&id)
    }

    /// All value schemas, ordered by id
    pub fn value_schemas(&self) -> impl Iterator<Item = &SchemaEntry> {
        self.value_schemas.values()
    }

    /// Number of value schemas
    pub fn value_schema_count(&self) -> usize {
        self.value_schemas.len()
    }

    /// Highest value schema id present
    pub fn max_value_schema_id(&self) -> Option<i32> {
        self.value_schemas.keys().next_back().copied()
    }

    /// Find the id of the value schema whose content matches `schema`
    ///
    /// Schemas are compared as parsed documents, so formatting and field
    /// order do not matter. Stored schemas that fail to parse never match.
    pub fn schema_id(&self, schema: &str) -> Result<Option<i32>, SchemaParseError> {
        let wanted = parse_schema(schema)?;
        Ok(self
            .value_schemas
            .values()
            .find(|entry| entry.parse().is_ok_and(|parsed| parsed == wanted))
            .map(|entry| entry.id))
    }
}

/// Kinds of system stores derived from a regular store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum SystemStoreType {
    /// Carries the metadata of its regular store
    #[display("meta_store")]
    MetaStore,
    /// Carries push status of its regular store
    #[display("push_status_store")]
    PushStatusStore,
}

impl SystemStoreType {
    /// All system store types
    pub const ALL: [Self; 2] = [Self::MetaStore, Self::PushStatusStore];

    /// Name prefix of this system store type
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::MetaStore => "metacache_system_store_meta_store_",
            Self::PushStatusStore => "metacache_system_store_push_status_store_",
        }
    }

    /// Detect the system store type of a store name
    pub fn from_store_name(store_name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| store_name.starts_with(t.prefix()) && store_name.len() > t.prefix().len())
    }

    /// Name of this system store for a regular store
    pub fn system_store_name(&self, regular_store_name: &str) -> String {
        format!("{}{}", self.prefix(), regular_store_name)
    }

    /// Regular store name embedded in a system store name
    pub fn extract_regular_store_name<'a>(&self, store_name: &'a str) -> &'a str {
        store_name.strip_prefix(self.prefix()).unwrap_or(store_name)
    }
}

/// Map a store name to its regular store (identity for regular stores)
pub fn regular_store_name(store_name: &str) -> &str {
    SystemStoreType::from_store_name(store_name)
        .map_or(store_name, |t| t.extract_regular_store_name(store_name))
}
