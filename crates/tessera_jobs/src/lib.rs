//! Background job dispatch for hashing and transfer work.
//!
//! The engine submits work and polls for its outcome; it never blocks on a
//! job except through [`wait_for`], which is bounded by a caller timeout.
//! [`Dispatcher`] is the capability the engine consumes; [`LocalDispatcher`]
//! is an in-process worker pool implementing it.

#![warn(missing_docs)]

pub mod dispatcher;
pub mod error;
pub mod job;
pub mod local;
pub mod meta;

pub use dispatcher::{wait_for, Dispatcher};
pub use error::DispatchError;
pub use job::{JobHandle, JobMeta, JobReporter, JobSnapshot, JobStatus, JobTask};
pub use local::LocalDispatcher;
pub use meta::MetaError;
