//! Configuration validation rules.
//!
//! This module provides validation logic for `CacheConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::CacheConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl CacheConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `max_node_files` is 0
    /// - `rebalancing_check_interval` is 0
    /// - `expiry_days` is set to 0
    /// - `cache_root_path` is set but empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_node_files == 0 {
            return Err(ConfigError::Invalid {
                field: "max_node_files".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.rebalancing_check_interval == 0 {
            return Err(ConfigError::Invalid {
                field: "rebalancing_check_interval".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.expiry_days == Some(0) {
            return Err(ConfigError::Invalid {
                field: "expiry_days".into(),
                reason: "must be at least 1 day when set".into(),
            });
        }

        if let Some(root) = &self.cache_root_path
            && root.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid { field: "cache_root_path".into(), reason: "must not be empty".into() });
        }

        if self.rebalancing_check_interval < self.max_node_files as u64 {
            tracing::debug!(
                max_node_files = self.max_node_files,
                rebalancing_check_interval = self.rebalancing_check_interval,
                "rebalancing interval is shorter than the leaf capacity; full sweeps will run often"
            );
        }

        Ok(())
    }
}
