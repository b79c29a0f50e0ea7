//! One dispatched transfer batch and the worker code that runs it.

use std::sync::Arc;

use tessera_jobs::meta::{self, COMPLETED_BYTES, FAILURES, FAILURE_KEYS, MESSAGE};
use tessera_jobs::{Dispatcher, JobHandle, JobReporter, JobSnapshot, JobStatus, JobTask};
use tracing::{debug, warn};

use crate::backend::StorageBackend;
use crate::error::SyncError;
use crate::object::{PullObject, PushObject, TransferObject, TransferResult};

/// Tracks one submitted transfer batch through its last observed snapshot.
///
/// Progress is only as fresh as the last [`TransferJob::refresh`].
#[derive(Debug, Clone)]
pub struct TransferJob<T> {
    handle: JobHandle,
    objects: Vec<T>,
    snapshot: JobSnapshot,
}

/// A batch upload.
pub type BackgroundUploadJob = TransferJob<PushObject>;
/// A batch download.
pub type BackgroundDownloadJob = TransferJob<PullObject>;

impl<T: TransferObject> TransferJob<T> {
    /// Submits `objects` as one job that moves them through `backend`.
    pub fn submit(
        dispatcher: &dyn Dispatcher,
        backend: Arc<dyn StorageBackend>,
        objects: Vec<T>,
    ) -> Result<Self, SyncError> {
        let task = transfer_task(backend, objects.clone());
        let handle = dispatcher.submit(T::KIND, task)?;
        debug!(%handle, kind = T::KIND, objects = objects.len(), "transfer job submitted");
        Ok(Self {
            handle,
            objects,
            snapshot: JobSnapshot {
                status: JobStatus::Queued,
                meta: Default::default(),
                error: None,
            },
        })
    }

    /// Re-reads the job's status and metadata.
    pub fn refresh(&mut self, dispatcher: &dyn Dispatcher) -> Result<(), SyncError> {
        self.snapshot = dispatcher.poll(&self.handle)?;
        Ok(())
    }

    /// Replaces the snapshot with one obtained elsewhere (e.g. from `wait_for`).
    pub fn observe(&mut self, snapshot: JobSnapshot) {
        self.snapshot = snapshot;
    }

    /// Returns the job handle.
    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    /// Returns the objects in this batch.
    pub fn objects(&self) -> &[T] {
        &self.objects
    }

    /// Returns the last observed status.
    pub fn status(&self) -> JobStatus {
        self.snapshot.status
    }

    /// `true` while queued or started.
    pub fn is_running(&self) -> bool {
        self.snapshot.status.is_running()
    }

    /// `true` if the job crashed or errored as a whole.
    pub fn is_failed(&self) -> bool {
        self.snapshot.status == JobStatus::Failed
    }

    /// `true` once the job ran to completion; per-object results are
    /// available.
    pub fn is_complete(&self) -> bool {
        self.snapshot.status == JobStatus::Finished
    }

    /// Bytes transferred so far, as last reported by the job. Zero until the
    /// job publishes progress.
    pub fn completed_bytes(&self) -> u64 {
        self.snapshot
            .meta_value(COMPLETED_BYTES)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    fn ensure_complete(&self) -> Result<(), SyncError> {
        match self.snapshot.status {
            JobStatus::Finished => Ok(()),
            JobStatus::Failed => Err(SyncError::JobFailed {
                handle: self.handle.clone(),
                reason: self
                    .snapshot
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            }),
            status => Err(SyncError::NotComplete {
                handle: self.handle.clone(),
                status,
            }),
        }
    }

    /// Dataset paths of the objects that failed to transfer.
    ///
    /// Fails with [`SyncError::NotComplete`] while the job is running and
    /// [`SyncError::JobFailed`] if the job failed as a whole.
    pub fn failure_keys(&self) -> Result<Vec<String>, SyncError> {
        self.ensure_complete()?;
        let value = self.snapshot.meta_value(FAILURE_KEYS).unwrap_or("");
        if meta::is_structured(value) {
            return Ok(meta::decode_list(FAILURE_KEYS, value)?);
        }
        Ok(value
            .split(',')
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Objects that failed to transfer, decoded from the job metadata.
    ///
    /// Same preconditions as [`TransferJob::failure_keys`].
    pub fn failures(&self) -> Result<Vec<T>, SyncError> {
        self.ensure_complete()?;
        let value = self.snapshot.meta_value(FAILURES).unwrap_or("");
        if meta::is_structured(value) {
            return Ok(meta::decode_list(FAILURES, value)?);
        }
        Ok(meta::decode_legacy_triples(FAILURES, value)?
            .into_iter()
            .map(|[object_path, dataset_path, revision]| {
                T::from_parts(object_path, dataset_path, revision)
            })
            .collect())
    }

    /// The job's per-object outcome. Same preconditions as
    /// [`TransferJob::failures`].
    pub fn result(&self) -> Result<TransferResult<T>, SyncError> {
        let failure = self.failures()?;
        let success = self
            .objects
            .iter()
            .filter(|o| !failure.contains(o))
            .cloned()
            .collect();
        let message = self
            .snapshot
            .meta_value(MESSAGE)
            .unwrap_or_default()
            .to_string();
        Ok(TransferResult {
            success,
            failure,
            message,
        })
    }
}

/// Builds the worker-side task: transfers each object in order, publishing
/// progress after each one and the failure list at the end.
fn transfer_task<T: TransferObject>(backend: Arc<dyn StorageBackend>, objects: Vec<T>) -> JobTask {
    Box::new(move |reporter: &JobReporter| -> Result<(), String> {
        let mut completed: u64 = 0;
        let mut failures: Vec<T> = Vec::new();
        reporter.set_meta(COMPLETED_BYTES, "0");
        for object in &objects {
            match object.transfer(backend.as_ref()) {
                Ok(bytes) => {
                    completed += bytes;
                    reporter.set_meta(COMPLETED_BYTES, completed.to_string());
                }
                Err(err) => {
                    warn!(
                        kind = T::KIND,
                        dataset_path = object.dataset_path(),
                        %err,
                        "object transfer failed"
                    );
                    failures.push(object.clone());
                }
            }
        }
        let keys: Vec<&str> = failures.iter().map(|o| o.dataset_path()).collect();
        reporter.set_meta(FAILURE_KEYS, meta::encode_list(&keys));
        reporter.set_meta(FAILURES, meta::encode_list(&failures));
        reporter.set_meta(
            MESSAGE,
            format!(
                "{} {} of {} objects via {}",
                T::VERB,
                objects.len() - failures.len(),
                objects.len(),
                backend.name()
            ),
        );
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tessera_jobs::{wait_for, LocalDispatcher};

    use crate::backend::LocalDirectoryBackend;

    fn job_with(status: JobStatus, meta: &[(&str, &str)]) -> BackgroundUploadJob {
        TransferJob {
            handle: JobHandle::new("push-1"),
            objects: vec![
                PushObject::new("/o/a", "a.csv", "r1"),
                PushObject::new("/o/b", "b,c|d.csv", "r1"),
            ],
            snapshot: JobSnapshot {
                status,
                meta: meta
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
                error: (status == JobStatus::Failed).then(|| "worker lost".to_string()),
            },
        }
    }

    #[test]
    fn running_job_flags_and_progress() {
        let job = job_with(JobStatus::Started, &[(COMPLETED_BYTES, "1024")]);
        assert!(job.is_running());
        assert!(!job.is_complete());
        assert!(!job.is_failed());
        assert_eq!(job.completed_bytes(), 1024);
    }

    #[test]
    fn missing_progress_reads_zero() {
        let job = job_with(JobStatus::Queued, &[]);
        assert_eq!(job.completed_bytes(), 0);
        let job = job_with(JobStatus::Started, &[(COMPLETED_BYTES, "garbage")]);
        assert_eq!(job.completed_bytes(), 0);
    }

    #[test]
    fn failures_before_completion_is_not_complete() {
        let job = job_with(JobStatus::Started, &[]);
        assert!(matches!(job.failures(), Err(SyncError::NotComplete { .. })));
        assert!(matches!(job.failure_keys(), Err(SyncError::NotComplete { .. })));
    }

    #[test]
    fn failures_of_failed_job_is_job_failed() {
        let job = job_with(JobStatus::Failed, &[]);
        assert!(job.is_failed());
        assert!(matches!(job.result(), Err(SyncError::JobFailed { .. })));
    }

    #[test]
    fn finished_with_no_failures() {
        let job = job_with(JobStatus::Finished, &[(FAILURES, ""), (FAILURE_KEYS, "")]);
        let result = job.result().unwrap();
        assert_eq!(result.success.len(), 2);
        assert!(result.failure.is_empty());
        assert!(job.failure_keys().unwrap().is_empty());
    }

    #[test]
    fn legacy_failures_with_delimiters_in_path() {
        let job = job_with(
            JobStatus::Finished,
            &[(FAILURES, "/o/b|b,c|d.csv|r1"), (FAILURE_KEYS, "b")],
        );
        let failures = job.failures().unwrap();
        assert_eq!(failures, vec![PushObject::new("/o/b", "b,c|d.csv", "r1")]);
        let result = job.result().unwrap();
        assert_eq!(result.success, vec![PushObject::new("/o/a", "a.csv", "r1")]);
    }

    #[test]
    fn structured_failures() {
        let failed = vec![PushObject::new("/o/b", "b,c|d.csv", "r1")];
        let encoded = meta::encode_list(&failed);
        let keys = meta::encode_list(&["b,c|d.csv"]);
        let job = job_with(
            JobStatus::Finished,
            &[(FAILURES, encoded.as_str()), (FAILURE_KEYS, keys.as_str())],
        );
        assert_eq!(job.failures().unwrap(), failed);
        assert_eq!(job.failure_keys().unwrap(), vec!["b,c|d.csv"]);
    }

    #[test]
    fn worker_reports_progress_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let objects_dir = dir.path().join("objects");
        std::fs::create_dir_all(&objects_dir).unwrap();
        let good = tessera_common::ContentHash::from_bytes(b"good bytes");
        std::fs::write(objects_dir.join(good.to_string()), b"good bytes").unwrap();
        let missing = tessera_common::ContentHash::from_bytes(b"missing");

        let objects = vec![
            PushObject::new(objects_dir.join(good.to_string()).to_string_lossy(), "good.txt", "r1"),
            PushObject::new(
                objects_dir.join(missing.to_string()).to_string_lossy(),
                "missing.txt",
                "r1",
            ),
        ];
        let backend = Arc::new(LocalDirectoryBackend::new(dir.path().join("remote")));
        let dispatcher = LocalDispatcher::new(1).unwrap();
        let mut job = TransferJob::submit(&dispatcher, backend.clone(), objects).unwrap();
        let snapshot = wait_for(
            &dispatcher,
            job.handle(),
            Duration::from_secs(10),
            Duration::from_millis(5),
        )
        .unwrap();
        job.observe(snapshot);

        assert!(job.is_complete());
        assert_eq!(job.completed_bytes(), 10);
        let result = job.result().unwrap();
        assert_eq!(result.success[0].dataset_path, "good.txt");
        assert_eq!(result.failure[0].dataset_path, "missing.txt");
        assert_eq!(result.message, "Uploaded 1 of 2 objects via local-directory");
        assert!(backend.contains(&good).unwrap());
    }
}
