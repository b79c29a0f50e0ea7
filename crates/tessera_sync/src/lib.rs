//! Push/pull synchronization of a dataset's object pool with remote storage.
//!
//! Objects are transferred in batches, one background job per batch. A job
//! that finishes reports exactly which objects failed; a job that crashes
//! leaves its whole batch unresolved. [`SyncTracker`] submits batches and
//! folds their outcomes into one [`TransferResult`].

#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod job;
pub mod object;
pub mod plan;
pub mod tracker;

pub use backend::{LocalDirectoryBackend, StorageBackend};
pub use error::{StorageError, SyncError};
pub use job::{BackgroundDownloadJob, BackgroundUploadJob, TransferJob};
pub use object::{PullObject, PullResult, PushObject, PushResult, TransferObject, TransferResult};
pub use plan::{pull_candidates, push_candidates};
pub use tracker::SyncTracker;
