//! Persistent content-addressed cache for fetched URLs.
//!
//! This crate provides:
//! - A directory-trie cache that keeps every directory under a file bound
//! - An audit log of stored keys with optional expiry
//! - Compute-if-absent reads, singly or in bounded-concurrency batches
//! - Unified error types
//! - Configuration structures

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;

pub use batch::{BatchItem, BatchItemStatus, BatchOutcome, BatchSummary, resolve_all};
pub use cache::{AuditRecord, Digest, Node, NodeRange, Resolution, SweepReport, UrlCache, digest_key};
pub use config::{CacheConfig, ConfigError};
pub use error::Error;
