//! Cache configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (URLCACHE_*)
//! 2. TOML config file (if URLCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Cache configuration, owned by the cache instance it opens.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (URLCACHE_*)
/// 2. TOML config file (if URLCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory of the cache tree. Caching is disabled when unset.
    ///
    /// Set via URLCACHE_CACHE_ROOT_PATH environment variable.
    #[serde(default)]
    pub cache_root_path: Option<PathBuf>,

    /// Entries tolerated in a single leaf directory before it is split.
    ///
    /// Set via URLCACHE_MAX_NODE_FILES environment variable.
    #[serde(default = "default_max_node_files")]
    pub max_node_files: usize,

    /// Number of audit records between two full-tree sweeps.
    ///
    /// Set via URLCACHE_REBALANCING_CHECK_INTERVAL environment variable.
    #[serde(default = "default_rebalancing_check_interval")]
    pub rebalancing_check_interval: u64,

    /// Age in days after which `purge_expired` drops an entry.
    ///
    /// Set via URLCACHE_EXPIRY_DAYS environment variable. Expiry is only
    /// applied when explicitly requested.
    #[serde(default)]
    pub expiry_days: Option<u32>,
}

fn default_max_node_files() -> usize {
    0x400
}

fn default_rebalancing_check_interval() -> u64 {
    0x1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root_path: None,
            max_node_files: default_max_node_files(),
            rebalancing_check_interval: default_rebalancing_check_interval(),
            expiry_days: None,
        }
    }
}

impl CacheConfig {
    /// Default configuration rooted at `path`.
    pub fn at(path: impl AsRef<Path>) -> Self {
        Self { cache_root_path: Some(path.as_ref().to_path_buf()), ..Default::default() }
    }

    pub fn with_max_node_files(mut self, max_node_files: usize) -> Self {
        self.max_node_files = max_node_files;
        self
    }

    pub fn with_rebalancing_check_interval(mut self, interval: u64) -> Self {
        self.rebalancing_check_interval = interval;
        self
    }

    pub fn with_expiry_days(mut self, days: u32) -> Self {
        self.expiry_days = Some(days);
        self
    }

    /// Whether a cache root is configured.
    pub fn is_enabled(&self) -> bool {
        self.cache_root_path.is_some()
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `URLCACHE_`
    /// 2. TOML file from `URLCACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("URLCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("URLCACHE_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Cache root, for callers that cannot work without one.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the cache root is not set.
    pub fn require_cache_root(&self) -> Result<&Path, ConfigError> {
        self.cache_root_path.as_deref().ok_or_else(|| ConfigError::Missing {
            field: "cache_root_path".into(),
            hint: "Set URLCACHE_CACHE_ROOT_PATH environment variable".into(),
        })
    }
}
