//! Error types for lock acquisition.

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur while acquiring a lock.
///
/// Contention under fail-fast acquisition and expiry of a blocking
/// acquisition are separate variants so callers can tell "somebody else has
/// it" apart from "waited too long".
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Fail-fast acquisition found the lock held elsewhere.
    #[error("{scope} is locked")]
    Locked {
        /// Human-readable description of what the lock protects.
        scope: String,
    },

    /// Blocking acquisition did not succeed within the timeout.
    #[error("timed out after {timeout:?} waiting for lock on {scope}")]
    Timeout {
        /// Human-readable description of what the lock protects.
        scope: String,
        /// The timeout that expired.
        timeout: Duration,
    },

    /// The lock file could not be created, opened, or locked.
    #[error("lock I/O error at {path}: {source}")]
    Io {
        /// The lock file path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

impl LockError {
    /// Returns `true` for fail-fast contention.
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }

    /// Returns `true` for an expired blocking acquisition.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
