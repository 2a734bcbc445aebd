//! Compute-if-absent reads.
//!
//! On a miss the caller's compute function runs outside the cache lock, its
//! value is stored, and what is returned is always the stored copy read back
//! from disk. A failing compute function stores nothing and its error is
//! returned unchanged.

use serde::{Deserialize, Serialize};

use super::UrlCache;
use crate::Error;

/// How a resolved value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Served from an existing entry.
    Cached,
    /// Computed, stored, then read back.
    Computed,
    /// Computed with caching disabled; nothing stored.
    Uncached,
}

impl UrlCache {
    /// Return the cached value for `key`, computing and storing it first if
    /// it is absent.
    ///
    /// With caching disabled, `compute` is called directly every time.
    ///
    /// # Errors
    ///
    /// Errors from `compute` are returned as is; cache failures are converted
    /// with `E: From<Error>`.
    pub fn resolve<F, E>(&self, key: &str, compute: F) -> Result<String, E>
    where
        F: FnOnce(&str) -> Result<String, E>,
        E: From<Error>,
    {
        self.resolve_traced(key, compute).map(|(value, _)| value)
    }

    /// Like [`UrlCache::resolve`], also reporting whether `compute` ran.
    pub fn resolve_traced<F, E>(&self, key: &str, compute: F) -> Result<(String, Resolution), E>
    where
        F: FnOnce(&str) -> Result<String, E>,
        E: From<Error>,
    {
        tracing::debug!("reading for key: {key}");

        if !self.is_enabled() {
            return compute(key).map(|value| (value, Resolution::Uncached));
        }

        let resolution = if self.contains(key)? {
            Resolution::Cached
        } else {
            let value = compute(key)?;
            self.put(key, &value)?;
            Resolution::Computed
        };

        Ok((self.get(key)?, resolution))
    }
}
