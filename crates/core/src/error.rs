//! Unified error types for filecache.
//!
//! Display strings lead with an upper-case code so callers and logs can
//! match on the failure class without inspecting the variant.

use std::path::{Path, PathBuf};

/// Unified error type for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No entry or namespace exists for the requested key.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// The payload exists but could not be decoded into the requested shape.
    #[error("CORRUPT: {0}")]
    Corrupt(String),

    /// The payload is too large to be loaded into memory.
    #[error("RESOURCE_EXHAUSTED: {0}")]
    ResourceExhausted(String),

    /// A filesystem operation failed.
    #[error("IO_FAILURE: {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid key, namespace, or other caller input.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A value could not be serialized before being stored or hashed.
    #[error("SERIALIZE_FAILED: {0}")]
    Serialize(String),

    /// The background writer went away before reporting a result.
    #[error("QUEUE_CLOSED")]
    QueueClosed,
}

impl Error {
    pub(crate) fn io(op: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io { op, path: path.as_ref().to_path_buf(), source }
    }

    /// True for failures the caller should treat as "no data".
    ///
    /// A read that fails with any of these surfaces as absence rather than
    /// a fault.
    pub fn is_absent(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Corrupt(_) | Error::ResourceExhausted(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialize(err.to_string())
    }
}
