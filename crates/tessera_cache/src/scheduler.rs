//! Size-balanced sharding of hashing work across background jobs.
//!
//! Changed files are packed greedily into byte-bounded batches, one batch
//! per [`BackgroundHashJob`]. Each job hashes its files in input order and
//! publishes the results as job metadata, which [`HashScheduler::collect`]
//! decodes once the job finishes.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tessera_common::{ContentHash, InternalError};
use tessera_config::HashingConfig;
use tessera_jobs::meta::{self, FAST_HASH_RESULT, HASH_RESULT};
use tessera_jobs::{wait_for, Dispatcher, JobHandle, JobReporter, JobSnapshot, JobStatus, MetaError};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::smart_hash::SmartHash;

/// One planned shard of files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashBatch {
    /// Relative paths, in the order they were assigned.
    pub files: Vec<String>,
    /// Sum of the file sizes.
    pub total_bytes: u64,
}

/// Packs `(path, size)` pairs into batches.
///
/// Starts with `num_cores` empty batches and gives each file, in input
/// order, to the batch with the smallest running total (fewest files, then
/// lowest index, on ties). When that batch already holds files and the file
/// would push it past `max_job_bytes`, every batch is at least that full, so
/// a new batch is opened for the file instead. Empty batches are dropped at
/// the end.
///
/// No batch exceeds `max_job_bytes` unless it holds a single file that does.
pub fn plan_batches(
    files: &[(String, u64)],
    num_cores: usize,
    max_job_bytes: u64,
) -> Vec<HashBatch> {
    let mut batches = vec![HashBatch::default(); num_cores.max(1)];
    let mut heap: BinaryHeap<Reverse<(u64, usize, usize)>> =
        (0..batches.len()).map(|i| Reverse((0, 0, i))).collect();

    for (path, size) in files {
        let Some(Reverse((bytes, count, idx))) = heap.pop() else {
            break;
        };
        let target = if count > 0 && bytes.saturating_add(*size) > max_job_bytes {
            heap.push(Reverse((bytes, count, idx)));
            batches.push(HashBatch::default());
            batches.len() - 1
        } else {
            idx
        };
        let batch = &mut batches[target];
        batch.files.push(path.clone());
        batch.total_bytes = batch.total_bytes.saturating_add(*size);
        heap.push(Reverse((batch.total_bytes, batch.files.len(), target)));
    }

    batches.retain(|b| !b.files.is_empty());
    batches
}

/// One shard of hashing work and its job lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundHashJob {
    /// Relative paths to hash, in order.
    pub file_list: Vec<String>,
    /// Sum of the file sizes at planning time.
    pub total_bytes: u64,
    /// Set once the job has been submitted.
    pub job_handle: Option<JobHandle>,
    /// Number of times this job has been observed as failed. Never retried
    /// automatically.
    pub failure_count: u32,
}

impl From<HashBatch> for BackgroundHashJob {
    fn from(batch: HashBatch) -> Self {
        Self {
            file_list: batch.files,
            total_bytes: batch.total_bytes,
            job_handle: None,
            failure_count: 0,
        }
    }
}

/// Hash results for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedFile {
    /// Relative path.
    pub path: String,
    /// Content hash, or `None` if the path vanished before it was hashed.
    pub content_hash: Option<ContentHash>,
    /// Fast hash, or `None` if the path vanished.
    pub fast_hash: Option<String>,
}

/// Combined results of a set of hash jobs.
#[derive(Debug, Clone, Default)]
pub struct HashOutcome {
    /// Results of every finished job, job by job in planning order.
    pub hashed: Vec<HashedFile>,
    /// Number of jobs that ended in `Failed`.
    pub failed_jobs: usize,
    /// Number of jobs collected.
    pub total_jobs: usize,
}

impl HashOutcome {
    /// Returns `true` if every job finished.
    pub fn is_complete(&self) -> bool {
        self.failed_jobs == 0
    }
}

/// Plans, submits, and collects background hash jobs.
pub struct HashScheduler {
    dispatcher: Arc<dyn Dispatcher>,
    num_cores: usize,
    max_job_bytes: u64,
    block_size: usize,
    job_timeout: Duration,
    poll_interval: Duration,
}

impl HashScheduler {
    /// Creates a scheduler that submits to `dispatcher`.
    pub fn new(dispatcher: Arc<dyn Dispatcher>, config: &HashingConfig) -> Self {
        Self {
            dispatcher,
            num_cores: config.num_cores,
            max_job_bytes: config.max_job_bytes,
            block_size: config.block_size,
            job_timeout: config.job_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    /// Sizes `paths` under `files_root` and packs them into jobs.
    ///
    /// Paths that cannot be stat'ed count as zero bytes; the job will report
    /// them as unhashed.
    pub fn plan(&self, files_root: &Path, paths: &[String]) -> Vec<BackgroundHashJob> {
        let smart = SmartHash::new(files_root, self.block_size);
        let sized: Vec<(String, u64)> = paths
            .iter()
            .map(|p| {
                let size = std::fs::metadata(smart.resolve(p))
                    .map(|m| if m.is_dir() { 0 } else { m.len() })
                    .unwrap_or(0);
                (p.clone(), size)
            })
            .collect();
        let jobs: Vec<BackgroundHashJob> = plan_batches(&sized, self.num_cores, self.max_job_bytes)
            .into_iter()
            .map(BackgroundHashJob::from)
            .collect();
        debug!(
            files = paths.len(),
            jobs = jobs.len(),
            max_job_bytes = self.max_job_bytes,
            "planned hash batches"
        );
        jobs
    }

    /// Submits every job that has no handle yet.
    pub fn submit(
        &self,
        files_root: &Path,
        jobs: &mut [BackgroundHashJob],
    ) -> Result<(), CacheError> {
        for job in jobs.iter_mut().filter(|j| j.job_handle.is_none()) {
            let task = hash_task(files_root.to_path_buf(), job.file_list.clone(), self.block_size);
            let handle = self.dispatcher.submit("hash", task)?;
            debug!(
                %handle,
                files = job.file_list.len(),
                bytes = job.total_bytes,
                "submitted hash job"
            );
            job.job_handle = Some(handle);
        }
        Ok(())
    }

    /// Waits for every submitted job and decodes the results of the ones
    /// that finished.
    ///
    /// A failed job increments its `failure_count` and contributes nothing to
    /// `hashed`. Waiting is bounded by the configured job timeout.
    pub fn collect(&self, jobs: &mut [BackgroundHashJob]) -> Result<HashOutcome, CacheError> {
        let mut outcome = HashOutcome::default();
        for job in jobs.iter_mut() {
            let Some(handle) = job.job_handle.clone() else {
                continue;
            };
            outcome.total_jobs += 1;
            let snapshot = wait_for(
                self.dispatcher.as_ref(),
                &handle,
                self.job_timeout,
                self.poll_interval,
            )?;
            self.dispatcher.forget(&handle);
            match snapshot.status {
                JobStatus::Finished => {
                    outcome.hashed.extend(decode_results(&handle, &job.file_list, &snapshot)?);
                }
                _ => {
                    job.failure_count += 1;
                    outcome.failed_jobs += 1;
                    warn!(
                        %handle,
                        error = snapshot.error.as_deref().unwrap_or("unknown"),
                        failures = job.failure_count,
                        "hash job failed"
                    );
                }
            }
        }
        Ok(outcome)
    }

    /// Plans, submits, and collects in one call.
    pub fn hash_files(
        &self,
        files_root: &Path,
        paths: &[String],
    ) -> Result<HashOutcome, CacheError> {
        let mut jobs = self.plan(files_root, paths);
        self.submit(files_root, &mut jobs)?;
        self.collect(&mut jobs)
    }
}

fn hash_task(files_root: PathBuf, files: Vec<String>, block_size: usize) -> tessera_jobs::JobTask {
    Box::new(move |reporter: &JobReporter| -> Result<(), String> {
        let smart = SmartHash::new(files_root, block_size);
        let fast = smart.fast_hashes(&files);
        let hashes: Vec<Option<String>> = smart
            .compute_file_hashes(&files)
            .into_iter()
            .map(|h| h.map(|h| h.to_string()))
            .collect();
        reporter.set_meta(FAST_HASH_RESULT, meta::encode_list(&fast));
        reporter.set_meta(HASH_RESULT, meta::encode_list(&hashes));
        Ok(())
    })
}

fn decode_optional_list(key: &str, value: &str) -> Result<Vec<Option<String>>, MetaError> {
    if meta::is_structured(value) {
        meta::decode_list(key, value)
    } else {
        Ok(meta::decode_legacy_optional_list(value))
    }
}

fn decode_results(
    handle: &JobHandle,
    files: &[String],
    snapshot: &JobSnapshot,
) -> Result<Vec<HashedFile>, CacheError> {
    let hashes = decode_optional_list(HASH_RESULT, snapshot.meta_value(HASH_RESULT).unwrap_or(""))?;
    let fast = decode_optional_list(
        FAST_HASH_RESULT,
        snapshot.meta_value(FAST_HASH_RESULT).unwrap_or(""),
    )?;
    if hashes.len() != files.len() || fast.len() != files.len() {
        return Err(InternalError::new(format!(
            "job {handle} returned {} hashes and {} fast hashes for {} files",
            hashes.len(),
            fast.len(),
            files.len()
        ))
        .into());
    }

    files
        .iter()
        .zip(hashes)
        .zip(fast)
        .map(|((path, hash), fast_hash)| {
            let content_hash = hash
                .map(|h| {
                    ContentHash::from_str(&h).map_err(|e| MetaError::Malformed {
                        key: HASH_RESULT.to_string(),
                        reason: e.to_string(),
                    })
                })
                .transpose()?;
            Ok(HashedFile {
                path: path.clone(),
                content_hash,
                fast_hash,
            })
        })
        .collect()
}
