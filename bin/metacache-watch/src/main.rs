//! metacache watch - store metadata watcher
//!
//! Subscribes to a set of stores, logs every change the periodic refresh
//! picks up, and periodically prints cache staleness in Prometheus format.

use anyhow::Result;
use clap::Parser;
use metacache_client::build_fetcher;
use metacache_common::{FetcherConfig, RepositoryConfig, Store};
use metacache_repository::{
    ListenerResult, MetadataRepository, StalenessStats, StoreDataChangedListener,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "metacache-watch")]
#[command(about = "Watch store metadata through the metacache repository")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/metacache/watch.toml")]
    config: String,

    /// Stores to subscribe to
    stores: Vec<String>,

    /// Metadata service (or router) endpoint
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Use the request-based fetch strategy
    #[arg(long)]
    request_based: bool,

    /// Interval between full cache refreshes
    #[arg(long)]
    refresh_interval_secs: Option<u64>,

    /// Interval between stats reports
    #[arg(long, default_value = "30")]
    report_interval_secs: u64,

    /// Subscribe, print one report, and exit
    #[arg(long)]
    once: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct Config {
    #[serde(default)]
    repository: RepositoryConfig,
    #[serde(default)]
    fetcher: FetcherConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
struct LoggingConfig {
    #[serde(default = "default_log_level")]
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Apply CLI flags on top of file values
    fn merge_args(mut self, args: &Args) -> Self {
        if let Some(endpoint) = &args.endpoint {
            self.fetcher.endpoint.clone_from(endpoint);
        }
        if args.request_based {
            self.repository.use_request_based_metadata = true;
        }
        if let Some(secs) = args.refresh_interval_secs {
            self.repository.refresh_interval_secs = secs;
        }
        if args.log_level != "info" {
            self.logging.level.clone_from(&args.log_level);
        }
        self
    }
}

/// Logs store changes picked up by the repository
struct LoggingListener;

impl StoreDataChangedListener for LoggingListener {
    fn handle_store_changed(&self, store: &Store) -> ListenerResult {
        info!(
            "Store {} updated: version={}, read_quota={}cu, batch_get_limit={}",
            store.name, store.current_version, store.read_quota_in_cu, store.batch_get_limit
        );
        Ok(())
    }

    fn handle_store_deleted(&self, store: &Store) -> ListenerResult {
        info!("Store {} dropped from cache", store.name);
        Ok(())
    }
}

fn report(repository: &MetadataRepository, stats: &StalenessStats) -> Result<()> {
    let stores = repository.get_all_stores()?;
    info!(
        "{} stores cached, total read quota {}cu",
        stores.len(),
        repository.get_total_store_read_quota()?
    );
    for store in &stores {
        let cluster = repository.resolve_cluster(&store.name)?;
        info!(
            "  {} -> cluster {}",
            store.name,
            cluster.as_deref().unwrap_or("unknown")
        );
    }
    print!("{}", stats.export_prometheus());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load config file if it exists
    let config: Config = if std::path::Path::new(&args.config).exists() {
        let config_str = std::fs::read_to_string(&args.config)?;
        toml::from_str(&config_str).unwrap_or_else(|e| {
            eprintln!("Warning: Failed to parse config file: {}", e);
            Config::default()
        })
    } else {
        Config::default()
    };
    let config = config.merge_args(&args);

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting metacache watch");
    info!("Config file: {}", args.config);

    let stats = Arc::new(StalenessStats::default());
    let fetcher = build_fetcher(&config.repository, &config.fetcher)?;
    let repository = Arc::new(
        MetadataRepository::new(config.repository.clone(), fetcher).with_stats(stats.clone()),
    );
    repository.register_store_data_changed_listener(Arc::new(LoggingListener));
    repository.start()?;

    for store in &args.stores {
        if let Err(e) = repository.subscribe(store).await {
            warn!("Failed to subscribe to store {}: {}", store, e);
        }
    }

    if args.once {
        report(&repository, &stats)?;
        repository.clear().await?;
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(args.report_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => report(&repository, &stats)?,
        }
    }

    info!("Shutting down metacache watch");
    repository.clear().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_sections() {
        let config: Config = toml::from_str(
            r#"
            [repository]
            refresh_interval_secs = 15
            use_request_based_metadata = true

            [fetcher]
            endpoint = "http://router:7777"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.repository.refresh_interval_secs, 15);
        assert_eq!(config.repository.shutdown_grace_secs, 60);
        assert!(config.repository.use_request_based_metadata);
        assert_eq!(config.fetcher.endpoint, "http://router:7777");
        assert_eq!(config.fetcher.timeout_ms, 5000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let args = Args::parse_from([
            "metacache-watch",
            "--endpoint",
            "http://meta:9000",
            "--refresh-interval-secs",
            "5",
            "orders",
            "users",
        ]);
        let config = Config::default().merge_args(&args);

        assert_eq!(args.stores, vec!["orders", "users"]);
        assert_eq!(config.fetcher.endpoint, "http://meta:9000");
        assert_eq!(config.repository.refresh_interval_secs, 5);
        assert!(!config.repository.use_request_based_metadata);
        assert_eq!(config.logging.level, "info");
    }
}
