//! metacache Common - Shared types and utilities
//!
//! This crate provides the store metadata model, fetch error definitions,
//! and configuration used across all metacache components.

pub mod config;
pub mod error;
pub mod types;

pub use config::{FetcherConfig, RepositoryConfig};
pub use error::{FetchError, FetchResult};
pub use types::*;
