//! Error types for storage backends and transfer tracking.

use std::path::PathBuf;

use tessera_cache::CacheError;
use tessera_jobs::{DispatchError, JobHandle, JobStatus, MetaError};

/// Errors raised by a [`StorageBackend`](crate::StorageBackend) for a single
/// object.
///
/// Inside a transfer job these become entries in the job's failure list;
/// they never fail the job itself.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend has no object under this key.
    #[error("object {key} not found in remote storage")]
    NotFound {
        /// The content hash that was requested.
        key: String,
    },

    /// The bytes received do not hash to the requested key.
    #[error("object {key} is corrupt: received content hashes to {actual}")]
    Corrupt {
        /// The content hash that was requested.
        key: String,
        /// The hash of the bytes actually received.
        actual: String,
    },

    /// The object path does not name a content-addressed object.
    #[error("'{path}' is not a content-addressed object path")]
    InvalidObjectPath {
        /// The offending path.
        path: String,
    },

    /// An I/O error occurred reading or writing object bytes.
    #[error("storage I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Storing a pulled object in the local pool failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Errors raised while submitting, tracking, or reading transfer jobs.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A job's outcome was read before the job reached a terminal state.
    #[error("job {handle} is still {status:?}; its result is not available yet")]
    NotComplete {
        /// The job that was queried.
        handle: JobHandle,
        /// The job's status at the time of the query.
        status: JobStatus,
    },

    /// A job's per-object breakdown was read, but the job failed as a whole.
    #[error("job {handle} failed before completing: {reason}")]
    JobFailed {
        /// The job that failed.
        handle: JobHandle,
        /// The failure reported by the dispatcher.
        reason: String,
    },

    /// Submitting or polling a job failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Job metadata could not be decoded.
    #[error(transparent)]
    Meta(#[from] MetaError),

    /// Reading the manifest or object pool failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A storage backend call failed outside of a transfer job.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
