//! The job-dispatch capability consumed by the engine.

use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::DispatchError;
use crate::job::{JobHandle, JobSnapshot, JobTask};

/// Submits work to workers and reports on it.
///
/// Submission must not block on the work itself, and `poll` must be cheap
/// enough to call at sub-second intervals.
pub trait Dispatcher: Send + Sync {
    /// Queues `task` for execution. `name` identifies the kind of work in logs.
    fn submit(&self, name: &str, task: JobTask) -> Result<JobHandle, DispatchError>;

    /// Returns the current status and metadata of a job.
    fn poll(&self, handle: &JobHandle) -> Result<JobSnapshot, DispatchError>;

    /// Drops the dispatcher's record of a job whose terminal snapshot has
    /// been collected. Later polls of `handle` may fail with
    /// [`DispatchError::UnknownJob`]. Running jobs are not affected.
    fn forget(&self, _handle: &JobHandle) {}
}

/// Polls `handle` every `interval` until it reaches a terminal state.
///
/// Fails with [`DispatchError::Timeout`] once `timeout` has elapsed; the job
/// itself keeps running and can still be polled afterwards.
pub fn wait_for(
    dispatcher: &dyn Dispatcher,
    handle: &JobHandle,
    timeout: Duration,
    interval: Duration,
) -> Result<JobSnapshot, DispatchError> {
    let deadline = Instant::now() + timeout;
    loop {
        let snapshot = dispatcher.poll(handle)?;
        if snapshot.status.is_terminal() {
            debug!(%handle, status = ?snapshot.status, "job reached terminal state");
            return Ok(snapshot);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(DispatchError::Timeout {
                handle: handle.clone(),
                timeout,
            });
        }
        thread::sleep(interval.min(deadline - now));
    }
}
