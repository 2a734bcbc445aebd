//! Leaf splitting and full-tree sweeps.
//!
//! A split turns an overfull leaf `[low, high]` into an internal node with
//! children `[low, mid]` and `[mid + 1, high]`, named `mid` and `high`.
//! Entries are moved with `rename`, so a source file disappears only once its
//! destination exists.
//!
//! All functions here expect the caller to hold the cache lock exclusively.

use std::fs;

use serde::Serialize;

use super::tree::{Node, ensure_dir, locate_from};
use crate::Error;

/// Work done by a sweep or by the rebalancing that follows an insertion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Nodes visited by a full-tree sweep.
    pub nodes_visited: u64,
    /// Leaves split into two children.
    pub splits: u64,
    /// Entries moved from a split leaf into its children.
    pub entries_moved: u64,
    /// Entries found stranded in internal nodes and moved or dropped.
    pub strays_reconciled: u64,
    /// Leftover temporary files deleted.
    pub temp_files_removed: u64,
}

/// Split `leaf` into two half-range children and move its entries down.
///
/// Returns `None` when the leaf's range holds a single digest value.
pub(crate) fn split_leaf(leaf: &Node, report: &mut SweepReport) -> Result<Option<(Node, Node)>, Error> {
    let Some((lower_range, upper_range)) = leaf.range.split() else {
        tracing::warn!(path = %leaf.path.display(), "leaf range holds a single digest, not splitting");
        return Ok(None);
    };

    let lower = Node { path: leaf.path.join(lower_range.high.to_string()), range: lower_range };
    let upper = Node { path: leaf.path.join(upper_range.high.to_string()), range: upper_range };

    tracing::info!(
        path = %leaf.path.display(),
        mid = %lower_range.high,
        "splitting leaf"
    );

    // Lower child first: while the upper one is missing, digests above `mid`
    // fail to route instead of landing in the wrong half.
    ensure_dir(&lower.path)?;
    ensure_dir(&upper.path)?;

    for digest in leaf.entries()? {
        let target = if digest <= lower_range.high { &lower } else { &upper };
        move_entry(leaf, target, &digest.to_string())?;
        report.entries_moved += 1;
    }

    report.splits += 1;
    Ok(Some((lower, upper)))
}

/// Split `leaf` until it and every child it produced fit in `max_node_files`.
pub(crate) fn rebalance_leaf(leaf: Node, max_node_files: usize, report: &mut SweepReport) -> Result<(), Error> {
    let mut pending = vec![leaf];
    while let Some(node) = pending.pop() {
        if node.count_entries_up_to(max_node_files + 1)? <= max_node_files {
            continue;
        }
        if let Some((lower, upper)) = split_leaf(&node, report)? {
            pending.push(lower);
            pending.push(upper);
        }
    }
    Ok(())
}

/// Visit every node under `root`, splitting overfull leaves and repairing
/// leftovers of interrupted splits and writes.
pub(crate) fn sweep(root: Node, max_node_files: usize) -> Result<SweepReport, Error> {
    let mut report = SweepReport::default();
    let mut pending = vec![root];

    while let Some(node) = pending.pop() {
        report.nodes_visited += 1;
        remove_temp_files(&node, &mut report)?;

        let children = node.children()?;
        let next = if children.is_empty() {
            if node.count_entries_up_to(max_node_files + 1)? > max_node_files {
                split_leaf(&node, &mut report)?
            } else {
                None
            }
        } else {
            Some(reconcile(&node, &children, &mut report)?)
        };

        if let Some((lower, upper)) = next {
            pending.push(upper);
            pending.push(lower);
        }
    }

    tracing::info!(
        nodes = report.nodes_visited,
        splits = report.splits,
        moved = report.entries_moved,
        strays = report.strays_reconciled,
        "sweep completed"
    );
    Ok(report)
}

/// Bring an internal node back to exactly two well-formed children with no
/// entries of its own.
fn reconcile(node: &Node, children: &[Node], report: &mut SweepReport) -> Result<(Node, Node), Error> {
    let (lower_range, upper_range) = node.range.split().ok_or_else(|| {
        Error::Inconsistent(format!("{} owns a single digest but has children", node.path.display()))
    })?;
    let lower = Node { path: node.path.join(lower_range.high.to_string()), range: lower_range };
    let upper = Node { path: node.path.join(upper_range.high.to_string()), range: upper_range };

    if let Some(unexpected) = children.iter().find(|c| c.path != lower.path && c.path != upper.path) {
        return Err(Error::Inconsistent(format!(
            "{} does not match the split of {}",
            unexpected.path.display(),
            node.path.display()
        )));
    }

    for half in [&lower, &upper] {
        if !children.iter().any(|c| c.path == half.path) {
            tracing::warn!(path = %half.path.display(), "completing interrupted split");
            ensure_dir(&half.path)?;
        }
    }

    for digest in node.entries()? {
        let half = if digest <= lower_range.high { &lower } else { &upper };
        let leaf = locate_from(half.clone(), &digest)?;
        let name = digest.to_string();

        if leaf.entry_path(&digest).exists() {
            tracing::warn!(digest = %digest, path = %node.path.display(), "dropping stale copy stranded by a split");
            let stray = node.entry_path(&digest);
            fs::remove_file(&stray).map_err(|e| Error::io(format!("removing {}", stray.display()), e))?;
        } else {
            tracing::warn!(digest = %digest, path = %node.path.display(), "moving entry stranded by a split");
            move_entry(node, &leaf, &name)?;
        }
        report.strays_reconciled += 1;
    }

    Ok((lower, upper))
}

fn remove_temp_files(node: &Node, report: &mut SweepReport) -> Result<(), Error> {
    for path in node.temp_files()? {
        tracing::warn!(path = %path.display(), "removing leftover temporary file");
        fs::remove_file(&path).map_err(|e| Error::io(format!("removing {}", path.display()), e))?;
        report.temp_files_removed += 1;
    }
    Ok(())
}

fn move_entry(from: &Node, to: &Node, name: &str) -> Result<(), Error> {
    let source = from.path.join(name);
    let destination = to.path.join(name);
    tracing::debug!("moving {} to {}", name, to.path.display());
    fs::rename(&source, &destination)
        .map_err(|e| Error::io(format!("moving {} to {}", source.display(), destination.display()), e))
}
