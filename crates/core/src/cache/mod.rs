//! Filesystem-backed cache of fetched pages.
//!
//! This module provides a persistent, content-addressed cache laid out as a
//! directory trie under a root directory. It supports:
//!
//! - Content-addressed storage using SHA-256 digests as file names
//! - Self-partitioning directories bounded by `max_node_files`
//! - A reader/writer lock shared by every clone of a [`UrlCache`]
//! - An audit log mapping digests back to the keys they came from
//! - Compute-if-absent reads via [`UrlCache::resolve`]

pub mod audit;
pub mod hash;
pub mod read_through;
pub mod rebalance;
pub mod store;
pub mod tree;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

pub use crate::Error;
use crate::config::CacheConfig;

pub use audit::{AuditRecord, INDEX_FILE_NAME};
pub use hash::{Digest, digest_key};
pub use read_through::Resolution;
pub use rebalance::SweepReport;
pub use tree::{Node, NodeRange};

use audit::AuditLog;

/// Cache handle.
///
/// Cheap to clone; clones share the same lock and insertion counter. A cache
/// built without a root is disabled: reads through it always compute.
#[derive(Clone, Debug)]
pub struct UrlCache {
    shared: Option<Arc<Shared>>,
}

#[derive(Debug)]
pub(crate) struct Shared {
    root: PathBuf,
    config: CacheConfig,
    audit: AuditLog,
    state: RwLock<State>,
}

/// Mutable bookkeeping guarded by the cache lock.
#[derive(Debug)]
pub(crate) struct State {
    /// Records currently in the audit log; drives the periodic sweep.
    insertions: u64,
}

impl UrlCache {
    /// Open a cache rooted at `path` with default tuning.
    ///
    /// Creates the directory if it doesn't exist.
    ///
    /// The lock lives in the returned handle, so two caches opened on the same
    /// root do not exclude each other. Open a root once per process and clone
    /// the handle.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::with_config(&CacheConfig::at(path))
    }

    /// Open a cache from a full configuration.
    ///
    /// Shares the locking caveat of [`UrlCache::open`].
    ///
    /// Returns a disabled cache when no root is configured. Otherwise the root
    /// is created if needed, the insertion counter is seeded from the audit
    /// log, and one sweep repairs whatever an interrupted process left behind.
    pub fn with_config(config: &CacheConfig) -> Result<Self, Error> {
        config.validate()?;

        let Some(root) = config.cache_root_path.as_deref() else {
            tracing::debug!("no cache root configured, caching disabled");
            return Ok(Self::disabled());
        };

        fs::create_dir_all(root).map_err(|e| Error::io(format!("creating {}", root.display()), e))?;
        let root = std::path::absolute(root).map_err(|e| Error::io(format!("resolving {}", root.display()), e))?;

        let audit = AuditLog::new(&root);
        let insertions = audit.count()?;
        rebalance::sweep(Node::root(&root), config.max_node_files)?;

        tracing::debug!(root = %root.display(), insertions, "setting cache path");

        let shared = Shared { root, config: config.clone(), audit, state: RwLock::new(State { insertions }) };
        Ok(Self { shared: Some(Arc::new(shared)) })
    }

    /// A cache that stores nothing.
    pub fn disabled() -> Self {
        Self { shared: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.is_some()
    }

    /// Absolute path of the cache root.
    pub fn root(&self) -> Option<&Path> {
        self.shared.as_deref().map(|s| s.root.as_path())
    }

    pub fn config(&self) -> Option<&CacheConfig> {
        self.shared.as_deref().map(|s| &s.config)
    }

    /// Leaf currently responsible for `key`.
    pub fn locate(&self, key: &str) -> Result<Node, Error> {
        let shared = self.shared()?;
        let _state = shared.state.read();
        tree::locate(&shared.root, &digest_key(key))
    }

    /// Run a full-tree sweep now.
    ///
    /// Returns an empty report on a disabled cache.
    pub fn rebalance(&self) -> Result<SweepReport, Error> {
        let Some(shared) = self.shared.as_deref() else {
            return Ok(SweepReport::default());
        };
        let _state = shared.state.write();
        tracing::info!("rebalancing cache");
        rebalance::sweep(Node::root(&shared.root), shared.config.max_node_files)
    }

    /// Every parseable record of the audit log, oldest first.
    pub fn audit_records(&self) -> Result<Vec<AuditRecord>, Error> {
        let Some(shared) = self.shared.as_deref() else {
            return Ok(Vec::new());
        };
        let _state = shared.state.read();
        shared.audit.records()
    }

    pub(crate) fn shared(&self) -> Result<&Shared, Error> {
        self.shared.as_deref().ok_or(Error::Disabled)
    }
}
