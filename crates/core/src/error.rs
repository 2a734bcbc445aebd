//! Unified error types for urlcache.
//!
//! Every message starts with a stable code so callers can match on the text
//! when the typed variant is not available (e.g. across a process boundary).

use std::io;

use crate::config::ConfigError;

/// Unified error type for the cache engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No entry stored for the given key.
    #[error("CACHE_MISS: {0}")]
    NotFound(String),

    /// The tree cannot route a digest; the on-disk layout is malformed.
    #[error("CACHE_INCONSISTENT: {0}")]
    Inconsistent(String),

    /// Underlying filesystem operation failed.
    #[error("CACHE_IO: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// A caller-supplied compute function failed.
    #[error("COMPUTE_FAILED: {0}")]
    ComputeFailed(String),

    /// The cache has no root directory configured.
    #[error("CACHE_DISABLED")]
    Disabled,

    /// Text that is not a 64-character lowercase hex digest.
    #[error("INVALID_DIGEST: {0}")]
    InvalidDigest(String),

    /// Invalid input parameters.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded or failed validation.
    #[error("CONFIG_ERROR: {0}")]
    Config(#[from] ConfigError),

    /// A batch worker panicked or was cancelled.
    #[error("WORKER_FAILED: {0}")]
    WorkerFailed(String),
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io { context: context.into(), source }
    }

    /// Stable code prefix of the error message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "CACHE_MISS",
            Error::Inconsistent(_) => "CACHE_INCONSISTENT",
            Error::Io { .. } => "CACHE_IO",
            Error::ComputeFailed(_) => "COMPUTE_FAILED",
            Error::Disabled => "CACHE_DISABLED",
            Error::InvalidDigest(_) => "INVALID_DIGEST",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::Config(_) => "CONFIG_ERROR",
            Error::WorkerFailed(_) => "WORKER_FAILED",
        }
    }

    /// Whether this is a cache miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
