//! Batch submission and result aggregation for push and pull.

use std::sync::Arc;
use std::time::Duration;

use tessera_cache::Manifest;
use tessera_config::EngineConfig;
use tessera_jobs::{wait_for, Dispatcher};
use tracing::{debug, info, warn};

use crate::backend::StorageBackend;
use crate::error::SyncError;
use crate::job::TransferJob;
use crate::object::{PullObject, PullResult, PushObject, PushResult, TransferObject, TransferResult};

/// Splits transfers into batches, submits one job per batch, and folds the
/// per-batch outcomes into a single [`TransferResult`].
pub struct SyncTracker {
    dispatcher: Arc<dyn Dispatcher>,
    backend: Arc<dyn StorageBackend>,
    batch_max_objects: usize,
    batch_max_bytes: u64,
    job_timeout: Duration,
    poll_interval: Duration,
}

impl SyncTracker {
    /// Creates a tracker using the `[sync]` batch limits and the `[hashing]`
    /// job timeout and poll interval of `config`.
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        backend: Arc<dyn StorageBackend>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            dispatcher,
            backend,
            batch_max_objects: config.sync.batch_max_objects.max(1),
            batch_max_bytes: config.sync.batch_max_bytes,
            job_timeout: config.hashing.job_timeout(),
            poll_interval: config.hashing.poll_interval(),
        }
    }

    /// Returns the storage backend transfers go through.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Splits `objects` into consecutive batches bounded by the object count
    /// and byte limits. A single object larger than the byte limit gets a
    /// batch of its own.
    pub fn plan_batches<T: TransferObject>(&self, objects: Vec<T>) -> Vec<Vec<T>> {
        let mut batches: Vec<Vec<T>> = Vec::new();
        let mut current: Vec<T> = Vec::new();
        let mut current_bytes: u64 = 0;
        for object in objects {
            let size = object.size_hint();
            let full = current.len() >= self.batch_max_objects
                || current_bytes.saturating_add(size) > self.batch_max_bytes;
            if !current.is_empty() && full {
                batches.push(std::mem::take(&mut current));
                current_bytes = 0;
            }
            current_bytes = current_bytes.saturating_add(size);
            current.push(object);
        }
        if !current.is_empty() {
            batches.push(current);
        }
        debug!(kind = T::KIND, batches = batches.len(), "transfer batches planned");
        batches
    }

    /// Submits one job per planned batch. Returns immediately.
    pub fn submit<T: TransferObject>(
        &self,
        objects: Vec<T>,
    ) -> Result<Vec<TransferJob<T>>, SyncError> {
        self.plan_batches(objects)
            .into_iter()
            .map(|batch| TransferJob::submit(self.dispatcher.as_ref(), self.backend.clone(), batch))
            .collect()
    }

    /// Refreshes every job and returns the bytes transferred so far across
    /// all of them.
    pub fn progress<T: TransferObject>(
        &self,
        jobs: &mut [TransferJob<T>],
    ) -> Result<u64, SyncError> {
        let mut total = 0;
        for job in jobs.iter_mut() {
            job.refresh(self.dispatcher.as_ref())?;
            total += job.completed_bytes();
        }
        Ok(total)
    }

    /// Waits for every job to reach a terminal state and aggregates the
    /// outcome. The dispatcher's records of the jobs are released; their
    /// final snapshots stay on the jobs.
    ///
    /// A finished job contributes its per-object breakdown. A job that failed
    /// as a whole contributes its entire batch to `failure`.
    pub fn wait<T: TransferObject>(
        &self,
        jobs: &mut [TransferJob<T>],
    ) -> Result<TransferResult<T>, SyncError> {
        let mut result = TransferResult::default();
        let mut failed_batches = 0usize;
        for job in jobs.iter_mut() {
            let snapshot = wait_for(
                self.dispatcher.as_ref(),
                job.handle(),
                self.job_timeout,
                self.poll_interval,
            )?;
            job.observe(snapshot);
            self.dispatcher.forget(job.handle());
            if job.is_complete() {
                result.absorb(job.result()?);
            } else {
                warn!(
                    handle = %job.handle(),
                    kind = T::KIND,
                    objects = job.objects().len(),
                    "transfer job failed; whole batch unresolved"
                );
                failed_batches += 1;
                result.failure.extend(job.objects().iter().cloned());
            }
        }

        let total = result.success.len() + result.failure.len();
        result.message = format!(
            "{} {} of {} objects via {}",
            T::VERB,
            result.success.len(),
            total,
            self.backend.name()
        );
        if failed_batches > 0 {
            result.message.push_str(&format!(
                "; {failed_batches} batch job(s) failed and must be resubmitted"
            ));
        }
        info!(
            kind = T::KIND,
            success = result.success.len(),
            failure = result.failure.len(),
            failed_batches,
            "transfer finished"
        );
        Ok(result)
    }

    /// Submits `objects` and waits for the aggregated outcome.
    pub fn transfer<T: TransferObject>(
        &self,
        objects: Vec<T>,
    ) -> Result<TransferResult<T>, SyncError> {
        let mut jobs = self.submit(objects)?;
        self.wait(&mut jobs)
    }

    /// Uploads `objects` from the local pool.
    pub fn push(&self, objects: Vec<PushObject>) -> Result<PushResult, SyncError> {
        self.transfer(objects)
    }

    /// Downloads `objects` into the object pool of `manifest`'s cache.
    ///
    /// The repository lock is held from submission until every batch is
    /// terminal, so downloads never overlap a manifest update or an object
    /// sweep.
    pub fn pull(
        &self,
        manifest: &Manifest,
        objects: Vec<PullObject>,
    ) -> Result<PullResult, SyncError> {
        let _guard = manifest.lock_repository()?;
        self.transfer(objects)
    }
}
