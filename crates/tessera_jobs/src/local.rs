//! In-process worker pool implementing [`Dispatcher`].

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::job::{JobHandle, JobReporter, JobSnapshot, JobStatus, JobTask};

struct JobRecord {
    status: JobStatus,
    reporter: JobReporter,
    error: Option<String>,
}

type JobTable = Arc<Mutex<HashMap<JobHandle, JobRecord>>>;

/// Runs jobs on a fixed-size `rayon` thread pool.
///
/// A job that panics is reported as `Failed`, the same way a crashed remote
/// worker would be. Records of terminal jobs are kept so they can be polled
/// any number of times, until [`Dispatcher::forget`] drops them.
pub struct LocalDispatcher {
    pool: rayon::ThreadPool,
    jobs: JobTable,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl LocalDispatcher {
    /// Creates a dispatcher with `workers` threads.
    pub fn new(workers: usize) -> Result<Self, DispatchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("tessera-worker-{i}"))
            .build()
            .map_err(|e| DispatchError::Unavailable {
                reason: e.to_string(),
            })?;
        Ok(Self {
            pool,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Stops accepting new jobs. Jobs already submitted keep running.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn set_status(jobs: &JobTable, handle: &JobHandle, status: JobStatus, error: Option<String>) {
    if let Some(record) = jobs.lock().get_mut(handle) {
        record.status = status;
        record.error = error;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("worker panicked: {msg}")
    } else {
        "worker panicked".to_string()
    }
}

impl Dispatcher for LocalDispatcher {
    fn submit(&self, name: &str, task: JobTask) -> Result<JobHandle, DispatchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::Unavailable {
                reason: "dispatcher is closed".to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = JobHandle::new(format!("{name}-{id}"));
        let reporter = JobReporter::new();
        self.jobs.lock().insert(
            handle.clone(),
            JobRecord {
                status: JobStatus::Queued,
                reporter: reporter.clone(),
                error: None,
            },
        );

        let jobs = Arc::clone(&self.jobs);
        let job = handle.clone();
        self.pool.spawn(move || {
            set_status(&jobs, &job, JobStatus::Started, None);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(&reporter)));
            let (status, error) = match outcome {
                Ok(Ok(())) => (JobStatus::Finished, None),
                Ok(Err(msg)) => (JobStatus::Failed, Some(msg)),
                Err(payload) => (JobStatus::Failed, Some(panic_message(&*payload))),
            };
            if let Some(err) = &error {
                warn!(handle = %job, %err, "job failed");
            }
            set_status(&jobs, &job, status, error);
        });

        debug!(%handle, "job submitted");
        Ok(handle)
    }

    fn poll(&self, handle: &JobHandle) -> Result<JobSnapshot, DispatchError> {
        let jobs = self.jobs.lock();
        let record = jobs.get(handle).ok_or_else(|| DispatchError::UnknownJob {
            handle: handle.clone(),
        })?;
        Ok(JobSnapshot {
            status: record.status,
            meta: record.reporter.snapshot(),
            error: record.error.clone(),
        })
    }

    fn forget(&self, handle: &JobHandle) {
        let mut jobs = self.jobs.lock();
        if jobs.get(handle).is_some_and(|r| r.status.is_terminal()) {
            jobs.remove(handle);
            debug!(%handle, "job record dropped");
        }
    }
}
