//! Job handles, status, and metadata.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Key/value metadata a job publishes while it runs.
pub type JobMeta = BTreeMap<String, String>;

/// The unit of work handed to a dispatcher.
///
/// The task receives a [`JobReporter`] for publishing metadata and returns
/// `Err` with a message when the job as a whole fails.
pub type JobTask = Box<dyn FnOnce(&JobReporter) -> Result<(), String> + Send + 'static>;

/// Opaque identifier of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobHandle(String);

impl JobHandle {
    /// Wraps a dispatcher-assigned job id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the job id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Submitted, waiting for a worker.
    Queued,
    /// Picked up by a worker.
    Started,
    /// Ran to completion.
    Finished,
    /// Crashed or returned an error before completing.
    Failed,
}

impl JobStatus {
    /// Returns `true` for `Finished` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Returns `true` for `Queued` and `Started`.
    pub fn is_running(self) -> bool {
        !self.is_terminal()
    }
}

/// Point-in-time view of a job returned by a poll.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    /// Current status.
    pub status: JobStatus,
    /// Metadata published so far. May lag behind the job's real progress.
    pub meta: JobMeta,
    /// Failure message for `Failed` jobs.
    pub error: Option<String>,
}

impl JobSnapshot {
    /// Returns a metadata value.
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }
}

/// Handle through which a running job publishes metadata.
#[derive(Debug, Clone, Default)]
pub struct JobReporter {
    meta: Arc<Mutex<JobMeta>>,
}

impl JobReporter {
    /// Creates a reporter with empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one metadata key, replacing any previous value.
    pub fn set_meta(&self, key: &str, value: impl Into<String>) {
        self.meta.lock().insert(key.to_string(), value.into());
    }

    /// Returns a copy of the current metadata.
    pub fn snapshot(&self) -> JobMeta {
        self.meta.lock().clone()
    }
}
