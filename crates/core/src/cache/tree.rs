//! Directory trie over the digest keyspace.
//!
//! Every directory under the cache root is a node owning an inclusive digest
//! range. An internal node has exactly two child directories named by the hex
//! of their upper bounds; the lower bound of a child is never stored and is
//! derived while descending (parent low for the first child, first child's
//! bound + 1 for the second). Leaves hold entry files named by digest.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::hash::Digest;
use crate::Error;

/// Suffix of in-flight entry writes.
pub(crate) const TEMP_SUFFIX: &str = ".tmp";

/// Inclusive range `[low, high]` of the digest keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRange {
    pub low: Digest,
    pub high: Digest,
}

impl NodeRange {
    /// The whole keyspace, owned by the root.
    pub const FULL: NodeRange = NodeRange { low: Digest::MIN, high: Digest::MAX };

    pub fn contains(&self, digest: &Digest) -> bool {
        self.low <= *digest && *digest <= self.high
    }

    /// Halves of this range, split at `low + (high - low) / 2`.
    ///
    /// `None` when the range holds a single digest value.
    pub fn split(&self) -> Option<(NodeRange, NodeRange)> {
        if self.low >= self.high {
            return None;
        }
        let mid = self.low.midpoint(self.high);
        let upper_low = mid.successor()?;
        Some((NodeRange { low: self.low, high: mid }, NodeRange { low: upper_low, high: self.high }))
    }
}

/// A directory of the cache tree together with the range it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub path: PathBuf,
    pub range: NodeRange,
}

impl Node {
    pub fn root(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), range: NodeRange::FULL }
    }

    /// File path of `digest` if it were stored in this node.
    pub fn entry_path(&self, digest: &Digest) -> PathBuf {
        self.path.join(digest.to_string())
    }

    /// Child nodes in ascending bound order, with their derived ranges.
    pub fn children(&self) -> Result<Vec<Node>, Error> {
        let mut low = Some(self.range.low);
        let mut children = Vec::new();

        for (bound, path) in child_bounds(&self.path)? {
            let child_low = low.ok_or_else(|| {
                Error::Inconsistent(format!("{} has a child after the end of the keyspace", self.path.display()))
            })?;
            if bound < child_low || bound > self.range.high {
                return Err(Error::Inconsistent(format!(
                    "child {bound} lies outside the range of {}",
                    self.path.display()
                )));
            }
            children.push(Node { path, range: NodeRange { low: child_low, high: bound } });
            low = bound.successor();
        }

        Ok(children)
    }

    /// Digests of the entry files stored directly in this node.
    pub fn entries(&self) -> Result<Vec<Digest>, Error> {
        let mut digests = Vec::new();
        for entry in read_dir(&self.path)? {
            let entry = entry.map_err(|e| Error::io(format!("listing {}", self.path.display()), e))?;
            if is_file(&entry)?
                && let Some(digest) = parse_name(&entry.file_name())
            {
                digests.push(digest);
            }
        }
        Ok(digests)
    }

    /// Number of entry files, counting no further than `limit`.
    pub fn count_entries_up_to(&self, limit: usize) -> Result<usize, Error> {
        let mut count = 0;
        for entry in read_dir(&self.path)? {
            if count >= limit {
                break;
            }
            let entry = entry.map_err(|e| Error::io(format!("listing {}", self.path.display()), e))?;
            if is_file(&entry)? && parse_name(&entry.file_name()).is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Leftover temporary files from interrupted writes.
    pub(crate) fn temp_files(&self) -> Result<Vec<PathBuf>, Error> {
        let mut paths = Vec::new();
        for entry in read_dir(&self.path)? {
            let entry = entry.map_err(|e| Error::io(format!("listing {}", self.path.display()), e))?;
            if is_file(&entry)? && entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX) {
                paths.push(entry.path());
            }
        }
        Ok(paths)
    }
}

/// Find the leaf of the tree rooted at `root` responsible for `digest`.
pub fn locate(root: &Path, digest: &Digest) -> Result<Node, Error> {
    locate_from(Node::root(root), digest)
}

/// Descend from `node` to the leaf responsible for `digest`.
///
/// At each level the first child whose bound is `>= digest` is taken.
pub fn locate_from(mut node: Node, digest: &Digest) -> Result<Node, Error> {
    loop {
        let children = node.children()?;
        if children.is_empty() {
            return Ok(node);
        }

        node = children
            .into_iter()
            .find(|child| child.range.high >= *digest)
            .ok_or_else(|| {
                Error::Inconsistent(format!("no child of {} covers digest {digest}", node.path.display()))
            })?;
    }
}

/// Child directories whose names parse as digests, sorted by bound.
fn child_bounds(path: &Path) -> Result<Vec<(Digest, PathBuf)>, Error> {
    let mut bounds = Vec::new();
    for entry in read_dir(path)? {
        let entry = entry.map_err(|e| Error::io(format!("listing {}", path.display()), e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| Error::io(format!("inspecting {}", entry.path().display()), e))?;
        if file_type.is_dir()
            && let Some(bound) = parse_name(&entry.file_name())
        {
            bounds.push((bound, entry.path()));
        }
    }
    bounds.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(bounds)
}

fn read_dir(path: &Path) -> Result<fs::ReadDir, Error> {
    fs::read_dir(path).map_err(|e| Error::io(format!("listing {}", path.display()), e))
}

fn is_file(entry: &fs::DirEntry) -> Result<bool, Error> {
    entry
        .file_type()
        .map(|t| t.is_file())
        .map_err(|e| Error::io(format!("inspecting {}", entry.path().display()), e))
}

fn parse_name(name: &std::ffi::OsStr) -> Option<Digest> {
    name.to_str().and_then(|s| s.parse().ok())
}

/// Create `path` as a directory, tolerating one that already exists.
pub(crate) fn ensure_dir(path: &Path) -> Result<(), Error> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(Error::io(format!("creating {}", path.display()), e)),
    }
}
