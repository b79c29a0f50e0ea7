//! Cross-process mutual exclusion for dataset caches.
//!
//! Two lock flavors share one implementation: a [`FileWriteLock`] scoped to a
//! single file name and a [`RepositoryLock`] scoped to a whole repository.
//! Both are backed by OS advisory locks on files in a shared lock directory,
//! so they exclude other processes as well as other threads. Acquisition
//! returns a [`LockGuard`] that releases the lock when dropped.

#![warn(missing_docs)]

pub mod error;
pub mod lock;

pub use error::LockError;
pub use lock::{FileWriteLock, LockGuard, LockState, RepositoryLock};
