//! Cluster configuration
//!
//! Settings come from three places, in the same shape:
//! - `ClusterConfig::default()`
//! - `CHUNKSTORE_*` environment variables (`from_env`)
//! - a TOML document (`from_toml_str` / `load`)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Cluster configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Smallest free remainder a split may leave behind (bytes)
    pub min_chunk_size: u64,
    /// Number of chunk headers kept in the LRU cache
    pub cache_capacity: usize,
    /// Read-after-write and free/user list cross-validation
    pub validate: bool,
    /// Initial body capacity of the free-list and user-list chunks
    pub list_capacity: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: 8,
            cache_capacity: 1024,
            validate: cfg!(debug_assertions),
            list_capacity: 32,
        }
    }
}

impl ClusterConfig {
    /// Build a configuration from `CHUNKSTORE_*` environment variables,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let min_chunk_size = std::env::var("CHUNKSTORE_MIN_CHUNK_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.min_chunk_size);

        let cache_capacity = std::env::var("CHUNKSTORE_CACHE_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.cache_capacity);

        let validate = std::env::var("CHUNKSTORE_VALIDATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.validate);

        let list_capacity = std::env::var("CHUNKSTORE_LIST_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.list_capacity);

        Self {
            min_chunk_size,
            cache_capacity,
            validate,
            list_capacity,
        }
    }

    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    /// Load a TOML configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject settings the allocator cannot work with
    pub fn check(&self) -> Result<()> {
        if self.min_chunk_size == 0 {
            return Err(Error::Config("min_chunk_size must be positive".into()));
        }
        if self.cache_capacity == 0 {
            return Err(Error::Config("cache_capacity must be positive".into()));
        }
        if self.list_capacity == 0 {
            return Err(Error::Config("list_capacity must be positive".into()));
        }
        Ok(())
    }
}
