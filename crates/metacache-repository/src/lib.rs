//! metacache Repository - client-side store metadata cache
//!
//! Callers subscribe to stores once; afterwards every read is served from
//! an in-process cache that a background task refreshes on a fixed
//! interval. Remote access goes through a pluggable [`MetadataFetcher`].
//!
//! ```text
//! subscribe ──► refresh_one_store ──► MetadataFetcher ──► cache ──► listeners
//!                      ▲
//!   periodic task ─────┘ (every subscribed store, failures isolated)
//! ```

pub mod error;
pub mod fetcher;
pub mod lifecycle;
pub mod listener;
pub mod memory;
pub mod repository;
pub mod schema;
pub mod stats;

pub use error::{MetadataError, Result};
pub use fetcher::MetadataFetcher;
pub use lifecycle::LifecycleState;
pub use listener::{ListenerRegistry, ListenerResult, StoreDataChangedListener, StoreEvent};
pub use memory::InMemoryFetcher;
pub use repository::{MetadataRepository, RefreshSummary};
pub use stats::{Clock, NoopStats, RepositoryStats, StalenessStats, SystemClock};
