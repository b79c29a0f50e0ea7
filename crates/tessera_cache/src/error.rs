//! Error types for cache operations.

use std::path::PathBuf;

use tessera_common::{ContentHash, InternalError};
use tessera_jobs::{DispatchError, MetaError};
use tessera_lock::LockError;

use crate::vcs::VcsError;

/// Errors that can occur during cache and manifest operations.
///
/// A file that vanished between diffing and hashing is not an error; it
/// shows up as a missing hash and is skipped.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The manifest file exists but could not be parsed.
    #[error("failed to parse manifest: {reason}")]
    ManifestParse {
        /// Description of the parse failure.
        reason: String,
    },

    /// A serialization error occurred while writing the manifest.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// The dataset identity needed to locate the cache root is incomplete.
    #[error("cache context is missing '{field}'")]
    MissingContext {
        /// The missing context field (`user`, `namespace`, or `dataset`).
        field: &'static str,
    },

    /// The path is not present in the manifest.
    #[error("'{path}' is not in the manifest")]
    UnknownPath {
        /// The requested relative path.
        path: String,
    },

    /// One or more background hash jobs failed; nothing was committed.
    #[error("{failed} of {total} hash jobs failed")]
    HashJobsFailed {
        /// Number of failed jobs.
        failed: usize,
        /// Number of submitted jobs.
        total: usize,
    },

    /// Bytes offered to the object pool do not hash to the object's name.
    #[error("content for object {expected} hashes to {actual}; not stored")]
    ContentMismatch {
        /// The hash the object was to be stored under.
        expected: ContentHash,
        /// The digest of the bytes actually offered.
        actual: ContentHash,
    },

    /// Acquiring the repository lock failed.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Submitting or waiting on a job failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Job metadata could not be decoded.
    #[error(transparent)]
    Meta(#[from] MetaError),

    /// The version-control capability failed.
    #[error(transparent)]
    Vcs(#[from] VcsError),

    /// An internal invariant was violated.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = CacheError::Io {
            path: PathBuf::from("/tmp/cache/manifest.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("cache I/O error"));
        assert!(msg.contains("manifest.json"));
    }

    #[test]
    fn manifest_parse_display() {
        let err = CacheError::ManifestParse {
            reason: "unexpected EOF".to_string(),
        };
        assert!(err.to_string().contains("unexpected EOF"));
    }

    #[test]
    fn missing_context_display() {
        let err = CacheError::MissingContext { field: "namespace" };
        assert_eq!(err.to_string(), "cache context is missing 'namespace'");
    }

    #[test]
    fn unknown_path_display() {
        let err = CacheError::UnknownPath {
            path: "data/a.csv".to_string(),
        };
        assert_eq!(err.to_string(), "'data/a.csv' is not in the manifest");
    }

    #[test]
    fn hash_jobs_failed_display() {
        let err = CacheError::HashJobsFailed {
            failed: 1,
            total: 4,
        };
        assert_eq!(err.to_string(), "1 of 4 hash jobs failed");
    }

    #[test]
    fn content_mismatch_display() {
        let expected = ContentHash::from_bytes(b"a");
        let actual = ContentHash::from_bytes(b"b");
        let err = CacheError::ContentMismatch { expected, actual };
        assert_eq!(
            err.to_string(),
            format!("content for object {expected} hashes to {actual}; not stored")
        );
    }

    #[test]
    fn lock_error_is_transparent() {
        let err: CacheError = LockError::Locked {
            scope: "repository lab/scans".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "repository lab/scans is locked");
    }

    #[test]
    fn io_helper_keeps_path() {
        let make = CacheError::io("/cache/objects");
        let err = make(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(matches!(
            err,
            CacheError::Io { ref path, .. } if path == &PathBuf::from("/cache/objects")
        ));
    }
}
