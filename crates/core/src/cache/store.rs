//! Entry CRUD operations.
//!
//! Provides functions for creating, reading, and deleting cached entries,
//! plus whole-cache clearing and the opt-in expiry purge. Every operation
//! routes its key through [`digest_key`] and [`locate`].

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use super::UrlCache;
use super::audit::AuditRecord;
use super::hash::{Digest, digest_key};
use super::rebalance::{self, SweepReport};
use super::tree::{Node, TEMP_SUFFIX, locate};
use crate::Error;

impl UrlCache {
    /// Insert or replace the value stored for `key`.
    ///
    /// Appends an audit record, splits the written leaf if it overflowed, and
    /// runs a full sweep every `rebalancing_check_interval` records.
    ///
    /// The entry becomes visible only after its audit record is written; if
    /// either write fails the entry is not stored. A failure of the
    /// rebalancing that follows is returned, but the entry stays stored and
    /// reachable.
    pub fn put(&self, key: &str, value: &str) -> Result<(), Error> {
        let shared = self.shared()?;
        let digest = digest_key(key);
        let mut state = shared.state.write();

        tracing::debug!(digest = %digest, "adding to cache: {key}");
        let leaf = locate(&shared.root, &digest)?;
        let temp_path = stage_entry(&leaf, &digest, value)?;

        let committed = shared
            .audit
            .append(&AuditRecord::new(digest, key))
            .and_then(|()| commit_entry(&temp_path, &leaf.entry_path(&digest)));
        if let Err(e) = committed {
            discard_temp(&temp_path);
            return Err(e);
        }
        state.insertions += 1;

        let mut report = SweepReport::default();
        rebalance::rebalance_leaf(leaf, shared.config.max_node_files, &mut report)?;

        if state.insertions % shared.config.rebalancing_check_interval == 0 {
            tracing::info!(insertions = state.insertions, "periodic rebalancing");
            rebalance::sweep(Node::root(&shared.root), shared.config.max_node_files)?;
        }

        Ok(())
    }

    /// Read the value stored for `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if nothing is stored for `key`.
    pub fn get(&self, key: &str) -> Result<String, Error> {
        let shared = self.shared()?;
        let digest = digest_key(key);
        let _state = shared.state.read();

        tracing::debug!(digest = %digest, "reading from cache: {key}");
        let path = locate(&shared.root, &digest)?.entry_path(&digest);
        match fs::read_to_string(&path) {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(key.to_string())),
            Err(e) => Err(Error::io(format!("reading {}", path.display()), e)),
        }
    }

    /// Whether a value is stored for `key`, without reading it.
    ///
    /// Always false on a disabled cache.
    pub fn contains(&self, key: &str) -> Result<bool, Error> {
        let Some(shared) = self.shared.as_deref() else {
            return Ok(false);
        };
        let digest = digest_key(key);
        let _state = shared.state.read();

        let path = locate(&shared.root, &digest)?.entry_path(&digest);
        match fs::metadata(&path) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(format!("inspecting {}", path.display()), e)),
        }
    }

    /// Delete the entry for `key` and its audit records.
    ///
    /// Returns whether an entry was present. No-op on a disabled cache.
    pub fn remove(&self, key: &str) -> Result<bool, Error> {
        let Some(shared) = self.shared.as_deref() else {
            return Ok(false);
        };
        let digest = digest_key(key);
        let mut state = shared.state.write();

        tracing::debug!(digest = %digest, "removing from cache: {key}");
        let removed = remove_entry(&shared.root, &digest)?;
        state.insertions = shared.audit.prune(&HashSet::from([digest]))?;

        if removed {
            tracing::info!(digest = %digest, "removed key from cache");
        }
        Ok(removed)
    }

    /// Delete every entry, the whole tree and the audit log.
    ///
    /// The root directory itself is kept, as an empty single leaf.
    pub fn clear(&self) -> Result<(), Error> {
        let Some(shared) = self.shared.as_deref() else {
            return Ok(());
        };
        let mut state = shared.state.write();

        let entries =
            fs::read_dir(&shared.root).map_err(|e| Error::io(format!("listing {}", shared.root.display()), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(format!("listing {}", shared.root.display()), e))?;
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .map_err(|e| Error::io(format!("inspecting {}", path.display()), e))?
                .is_dir();
            let result = if is_dir { fs::remove_dir_all(&path) } else { fs::remove_file(&path) };
            result.map_err(|e| Error::io(format!("removing {}", path.display()), e))?;
        }
        shared.audit.remove()?;
        state.insertions = 0;

        tracing::info!(root = %shared.root.display(), "cache cleared");
        Ok(())
    }

    /// Remove entries whose latest insertion is more than `expiry_days` older
    /// than `as_of`.
    ///
    /// Returns the number of entries deleted; 0 when expiry is not configured
    /// or the cache is disabled.
    pub fn purge_expired(&self, as_of: NaiveDate) -> Result<u64, Error> {
        let Some(shared) = self.shared.as_deref() else {
            return Ok(0);
        };
        let Some(expiry_days) = shared.config.expiry_days else {
            return Ok(0);
        };
        let mut state = shared.state.write();

        let mut latest: HashMap<Digest, NaiveDate> = HashMap::new();
        for record in shared.audit.records()? {
            let date = latest.entry(record.digest).or_insert(record.date);
            if record.date > *date {
                *date = record.date;
            }
        }

        let expired: HashSet<Digest> = latest
            .into_iter()
            .filter(|(_, date)| (as_of - *date).num_days() > i64::from(expiry_days))
            .map(|(digest, _)| digest)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0u64;
        for digest in &expired {
            if remove_entry(&shared.root, digest)? {
                deleted += 1;
            }
        }
        state.insertions = shared.audit.prune(&expired)?;

        tracing::info!(deleted, expiry_days, as_of = %as_of, "purged expired entries");
        Ok(deleted)
    }
}

/// Write `value` to a temporary file next to its final path.
fn stage_entry(leaf: &Node, digest: &Digest, value: &str) -> Result<PathBuf, Error> {
    let temp_path = leaf.path.join(format!("{digest}{TEMP_SUFFIX}"));
    if let Err(e) = fs::write(&temp_path, value) {
        discard_temp(&temp_path);
        return Err(Error::io(format!("writing {}", temp_path.display()), e));
    }
    Ok(temp_path)
}

fn commit_entry(temp_path: &Path, path: &Path) -> Result<(), Error> {
    fs::rename(temp_path, path).map_err(|e| Error::io(format!("renaming {}", temp_path.display()), e))
}

fn discard_temp(temp_path: &Path) {
    match fs::remove_file(temp_path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        // Left for the next sweep.
        Err(e) => tracing::warn!(path = %temp_path.display(), "could not remove temporary file: {e}"),
    }
}

fn remove_entry(root: &Path, digest: &Digest) -> Result<bool, Error> {
    let path = locate(root, digest)?.entry_path(digest);
    match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(format!("removing {}", path.display()), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::INDEX_FILE_NAME;
    use crate::config::CacheConfig;
    use crate::test_support::{init_tracing, leaves};
    use chrono::{Days, Utc};
    use tempfile::TempDir;

    fn open(dir: &TempDir, max_node_files: usize, interval: u64) -> UrlCache {
        init_tracing();
        let config = CacheConfig::at(dir.path())
            .with_max_node_files(max_node_files)
            .with_rebalancing_check_interval(interval);
        UrlCache::with_config(&config).unwrap()
    }

    #[test]
    fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024, 4096);

        let value = "<html>\n  <p>caf\u{e9} \u{2603}</p>\n</html>\n";
        cache.put("https://example.com", value).unwrap();
        assert_eq!(cache.get("https://example.com").unwrap(), value);
    }

    #[test]
    fn test_put_empty_value() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024, 4096);

        cache.put("https://example.com/empty", "").unwrap();
        assert!(cache.contains("https://example.com/empty").unwrap());
        assert_eq!(cache.get("https://example.com/empty").unwrap(), "");
    }

    #[test]
    fn test_get_missing() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024, 4096);

        let result = cache.get("https://example.com/nope");
        assert!(matches!(result, Err(Error::NotFound(key)) if key == "https://example.com/nope"));
    }

    #[test]
    fn test_put_overwrites_in_place() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024, 4096);

        cache.put("k", "old").unwrap();
        cache.put("k", "new").unwrap();
        assert_eq!(cache.get("k").unwrap(), "new");
        assert_eq!(Node::root(dir.path()).entries().unwrap().len(), 1);
        assert_eq!(cache.audit_records().unwrap().len(), 2);
    }

    #[test]
    fn test_put_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024, 4096);

        cache.put("https://example.com", "page").unwrap();
        assert!(Node::root(dir.path()).temp_files().unwrap().is_empty());
    }

    #[test]
    fn test_put_with_unwritable_audit_log_stores_nothing() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024, 4096);
        fs::create_dir(dir.path().join(INDEX_FILE_NAME)).unwrap();

        let result = cache.put("k", "v");
        assert!(matches!(result, Err(Error::Io { .. })));
        assert!(!cache.contains("k").unwrap());
        assert!(Node::root(dir.path()).temp_files().unwrap().is_empty());
        assert!(Node::root(dir.path()).entries().unwrap().is_empty());

        let value = cache.resolve("k", |_| -> Result<String, Error> { Ok("fresh".into()) });
        assert!(matches!(value, Err(Error::Io { .. })));

        fs::remove_dir(dir.path().join(INDEX_FILE_NAME)).unwrap();
        let value = cache.resolve("k", |_| -> Result<String, Error> { Ok("fresh".into()) }).unwrap();
        assert_eq!(value, "fresh");
    }

    #[test]
    fn test_get_unreadable_entry_is_io_error() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024, 4096);
        fs::write(dir.path().join(digest_key("k").to_string()), [0xff, 0xfe, 0xfd]).unwrap();

        let result = cache.get("k");
        assert!(matches!(result, Err(Error::Io { .. })), "{result:?}");
    }

    #[test]
    fn test_contains() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024, 4096);

        assert!(!cache.contains("https://example.com").unwrap());
        cache.put("https://example.com", "page").unwrap();
        assert!(cache.contains("https://example.com").unwrap());
    }

    #[test]
    fn test_audit_records_insertions() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024, 4096);

        cache.put("https://example.com/a", "a").unwrap();
        cache.put("https://example.com/b", "b").unwrap();

        let records = cache.audit_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, "https://example.com/a");
        assert_eq!(records[0].digest, digest_key("https://example.com/a"));
        assert_eq!(records[0].date, Utc::now().date_naive());

        let log = fs::read_to_string(dir.path().join(INDEX_FILE_NAME)).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.contains(&format!("{}: \"https://example.com/b\"", digest_key("https://example.com/b"))));
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024, 4096);
        cache.put("https://example.com/a", "a").unwrap();
        cache.put("https://example.com/b", "b").unwrap();

        assert!(cache.remove("https://example.com/a").unwrap());
        assert!(!cache.contains("https://example.com/a").unwrap());
        assert!(cache.contains("https://example.com/b").unwrap());

        let keys: Vec<String> = cache.audit_records().unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["https://example.com/b"]);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024, 4096);
        cache.put("https://example.com/a", "a").unwrap();

        assert!(!cache.remove("https://example.com/other").unwrap());
        assert_eq!(cache.audit_records().unwrap().len(), 1);
    }

    #[test]
    fn test_three_keys_split_root() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 2, 4096);

        for key in ["a", "b", "c"] {
            cache.put(key, &format!("value of {key}")).unwrap();
        }

        assert!(Node::root(dir.path()).entries().unwrap().is_empty());
        let leaves = leaves(dir.path());
        assert!(leaves.len() >= 2);
        for leaf in &leaves {
            assert!(leaf.entries().unwrap().len() <= 2);
        }
        for key in ["a", "b", "c"] {
            assert_eq!(cache.get(key).unwrap(), format!("value of {key}"));
        }
    }

    #[test]
    fn test_leaves_stay_bounded_under_load() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 16, 64);

        for i in 0..500 {
            cache.put(&format!("https://example.com/page/{i}"), &i.to_string()).unwrap();
        }

        for leaf in leaves(dir.path()) {
            assert!(leaf.entries().unwrap().len() <= 16, "{} is overfull", leaf.path.display());
        }
        for i in 0..500 {
            assert_eq!(cache.get(&format!("https://example.com/page/{i}")).unwrap(), i.to_string());
        }
    }

    #[test]
    fn test_periodic_sweep_repairs_leftovers() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024, 3);
        let stray = dir.path().join(format!("{}{TEMP_SUFFIX}", digest_key("stray")));

        cache.put("a", "1").unwrap();
        fs::write(&stray, "partial").unwrap();
        cache.put("b", "2").unwrap();
        assert!(stray.exists());
        cache.put("c", "3").unwrap();
        assert!(!stray.exists());
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 2, 4096);
        let keys: Vec<String> = (0..20).map(|i| format!("https://example.com/{i}")).collect();
        for key in &keys {
            cache.put(key, "page").unwrap();
        }
        assert!(leaves(dir.path()).len() > 1);

        cache.clear().unwrap();

        for key in &keys {
            assert!(!cache.contains(key).unwrap());
        }
        assert_eq!(leaves(dir.path()), vec![Node::root(dir.path())]);
        assert!(cache.audit_records().unwrap().is_empty());
        assert!(!dir.path().join(INDEX_FILE_NAME).exists());
        assert!(dir.path().is_dir());

        cache.put("https://example.com/again", "page").unwrap();
        assert_eq!(cache.get("https://example.com/again").unwrap(), "page");
    }

    #[test]
    fn test_disabled_operations() {
        let cache = UrlCache::disabled();
        assert!(matches!(cache.put("k", "v"), Err(Error::Disabled)));
        assert!(matches!(cache.get("k"), Err(Error::Disabled)));
        assert!(!cache.contains("k").unwrap());
        assert!(!cache.remove("k").unwrap());
        assert!(cache.clear().is_ok());
        assert_eq!(cache.purge_expired(Utc::now().date_naive()).unwrap(), 0);
    }

    #[test]
    fn test_reopen_keeps_entries_and_counter() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open(&dir, 1024, 3);
            cache.put("a", "1").unwrap();
            cache.put("b", "2").unwrap();
        }

        let cache = open(&dir, 1024, 3);
        assert_eq!(cache.get("a").unwrap(), "1");

        let stray = dir.path().join(format!("{}{TEMP_SUFFIX}", digest_key("stray")));
        fs::write(&stray, "partial").unwrap();
        cache.put("c", "3").unwrap();
        assert!(!stray.exists(), "third record overall should trigger a sweep");
    }

    #[test]
    fn test_purge_expired() {
        let dir = TempDir::new().unwrap();
        init_tracing();
        let config = CacheConfig::at(dir.path()).with_expiry_days(3);
        let cache = UrlCache::with_config(&config).unwrap();
        for key in ["abc", "def", "ghf"] {
            cache.put(key, "v").unwrap();
        }

        let today = Utc::now().date_naive();
        assert_eq!(cache.purge_expired(today + Days::new(3)).unwrap(), 0);
        assert!(cache.contains("abc").unwrap());

        assert_eq!(cache.purge_expired(today + Days::new(10)).unwrap(), 3);
        for key in ["abc", "def", "ghf"] {
            assert!(!cache.contains(key).unwrap());
        }
        assert!(cache.audit_records().unwrap().is_empty());
    }

    #[test]
    fn test_purge_without_expiry_is_noop() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir, 1024, 4096);
        cache.put("abc", "v").unwrap();

        let far_future = Utc::now().date_naive() + Days::new(10_000);
        assert_eq!(cache.purge_expired(far_future).unwrap(), 0);
        assert!(cache.contains("abc").unwrap());
    }
}
