//! Error types for job submission and polling.

use std::time::Duration;

use tessera_common::InternalError;

use crate::job::JobHandle;

/// Errors raised by a dispatcher or while waiting on a job.
///
/// A job that runs and fails is not an error here; it is reported as
/// [`JobStatus::Failed`](crate::JobStatus::Failed) in its snapshot.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The dispatcher cannot accept work.
    #[error("dispatcher unavailable: {reason}")]
    Unavailable {
        /// Why submission was refused.
        reason: String,
    },

    /// The dispatcher has no record of the job.
    #[error("unknown job {handle}")]
    UnknownJob {
        /// The handle that was polled.
        handle: JobHandle,
    },

    /// A bounded wait expired before the job reached a terminal state.
    #[error("job {handle} did not finish within {timeout:?}")]
    Timeout {
        /// The job being waited on.
        handle: JobHandle,
        /// The timeout that expired.
        timeout: Duration,
    },

    /// The dispatcher's own bookkeeping is inconsistent.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_display() {
        let err = DispatchError::Unavailable {
            reason: "worker pool shut down".to_string(),
        };
        assert_eq!(err.to_string(), "dispatcher unavailable: worker pool shut down");
    }

    #[test]
    fn unknown_job_display() {
        let err = DispatchError::UnknownJob {
            handle: JobHandle::new("job-3"),
        };
        assert_eq!(err.to_string(), "unknown job job-3");
    }

    #[test]
    fn timeout_display() {
        let err = DispatchError::Timeout {
            handle: JobHandle::new("job-3"),
            timeout: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "job job-3 did not finish within 2s");
    }

    #[test]
    fn internal_display() {
        let err: DispatchError = InternalError::new("record vanished").into();
        assert_eq!(err.to_string(), "internal error: record vanished");
    }
}
