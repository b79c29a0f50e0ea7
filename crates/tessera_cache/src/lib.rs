//! Content-addressed, revision-linked cache of a dataset's working tree.
//!
//! Files are hashed ([`SmartHash`]), deduplicated into a flat object pool,
//! and tracked path by path in a [`Manifest`]. Each committed revision is
//! materialized as a directory of hard links into the pool. Large hashing
//! workloads are sharded across background jobs by the [`HashScheduler`].

#![warn(missing_docs)]

pub mod activity;
pub mod backend;
pub mod error;
pub mod manifest;
pub mod pool;
pub mod scheduler;
pub mod smart_hash;
pub mod status;
pub mod vcs;

pub use activity::{ActivityError, ActivitySink, UpdateActivity};
pub use backend::{cache_backend, CacheBackend, HostFilesystemCache, OBJECTS_DIR};
pub use error::CacheError;
pub use manifest::{Manifest, ManifestEntry};
pub use pool::ObjectPool;
pub use scheduler::{
    plan_batches, BackgroundHashJob, HashBatch, HashOutcome, HashScheduler, HashedFile,
};
pub use smart_hash::SmartHash;
pub use status::StatusResult;
pub use vcs::{VcsError, VersionControl};
