//! Cache freshness statistics
//!
//! Stats sinks are purely observational: their methods cannot fail, so
//! nothing they do can change the outcome of a refresh.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock time in milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Sink for cache refresh events
pub trait RepositoryStats: Send + Sync {
    /// A store's cache entry was refreshed at `timestamp_ms`
    fn on_cache_refreshed(&self, store_name: &str, timestamp_ms: u64);

    /// A store's cache entry was removed
    fn on_cache_entry_removed(&self, store_name: &str);
}

/// Stats sink that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl RepositoryStats for NoopStats {
    fn on_cache_refreshed(&self, _store_name: &str, _timestamp_ms: u64) {}

    fn on_cache_entry_removed(&self, _store_name: &str) {}
}

/// Tracks per-store refresh timestamps and reports metadata staleness
pub struct StalenessStats {
    clock: Arc<dyn Clock>,
    /// Last refresh time per store (ms since epoch)
    refreshed_at: RwLock<HashMap<String, u64>>,
}

impl Default for StalenessStats {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl StalenessStats {
    /// Create a stats sink using the given clock
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            refreshed_at: RwLock::new(HashMap::new()),
        }
    }

    /// Last refresh timestamp of a store
    pub fn last_refreshed(&self, store_name: &str) -> Option<u64> {
        self.refreshed_at.read().get(store_name).copied()
    }

    /// Number of stores with a recorded refresh
    pub fn tracked_stores(&self) -> usize {
        self.refreshed_at.read().len()
    }

    /// Age of the stalest cache entry in milliseconds
    pub fn staleness_high_watermark_ms(&self) -> Option<u64> {
        let oldest = self.refreshed_at.read().values().min().copied()?;
        Some(self.clock.now_millis().saturating_sub(oldest))
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::with_capacity(512);

        let _ = writeln!(
            output,
            "# HELP metacache_store_metadata_staleness_high_watermark_ms Age of the stalest cached store metadata"
        );
        let _ = writeln!(
            output,
            "# TYPE metacache_store_metadata_staleness_high_watermark_ms gauge"
        );
        let _ = writeln!(
            output,
            "metacache_store_metadata_staleness_high_watermark_ms {}",
            self.staleness_high_watermark_ms().unwrap_or(0)
        );

        let _ = writeln!(
            output,
            "# HELP metacache_cached_stores Stores with a recorded cache refresh"
        );
        let _ = writeln!(output, "# TYPE metacache_cached_stores gauge");
        let _ = writeln!(output, "metacache_cached_stores {}", self.tracked_stores());

        output
    }
}

impl RepositoryStats for StalenessStats {
    fn on_cache_refreshed(&self, store_name: &str, timestamp_ms: u64) {
        self.refreshed_at
            .write()
            .insert(store_name.to_string(), timestamp_ms);
    }

    fn on_cache_entry_removed(&self, store_name: &str) {
        self.refreshed_at.write().remove(store_name);
    }
}
