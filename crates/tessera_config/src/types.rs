//! Configuration types deserialized from `tessera.toml`.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default byte budget for a single background hash job (1 GB).
pub const DEFAULT_MAX_JOB_BYTES: u64 = 1_000_000_000;

/// Default read block size used when streaming file contents into a digest.
pub const DEFAULT_BLOCK_SIZE: usize = 65_536;

/// The top-level engine configuration parsed from `tessera.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Where the materialized-object cache lives and which backend lays it out.
    pub cache: CacheConfig,
    /// Identity of the dataset being cached (user, namespace, name).
    #[serde(default)]
    pub context: DatasetContext,
    /// Background hashing parameters.
    #[serde(default)]
    pub hashing: HashingConfig,
    /// Lock directory and acquisition timeout.
    #[serde(default)]
    pub locks: LockConfig,
    /// Push/pull batching limits.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl EngineConfig {
    /// Builds a configuration with every optional section at its default.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache: CacheConfig {
                base_dir: base_dir.into(),
                backend: CacheBackendKind::default(),
                storage_backend: default_storage_backend(),
            },
            context: DatasetContext::default(),
            hashing: HashingConfig::default(),
            locks: LockConfig::default(),
            sync: SyncConfig::default(),
        }
    }

    /// Returns the directory holding lock files, defaulting to `<base_dir>/locks`.
    pub fn lock_dir(&self) -> PathBuf {
        self.locks
            .dir
            .clone()
            .unwrap_or_else(|| self.cache.base_dir.join("locks"))
    }
}

/// Cache placement settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Base directory under which per-dataset cache roots are created.
    pub base_dir: PathBuf,
    /// Which cache layout to use.
    #[serde(default)]
    pub backend: CacheBackendKind,
    /// Name of the remote storage backend; part of the cache root path so
    /// that datasets synced against different stores never share objects.
    #[serde(default = "default_storage_backend")]
    pub storage_backend: String,
}

/// Explicit selection of the cache layout implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheBackendKind {
    /// Cache roots on the host filesystem under
    /// `<base_dir>/<storage_backend>/<user>/<namespace>/<dataset>`.
    #[default]
    HostFilesystem,
}

/// Identity of the dataset whose cache is being managed.
///
/// Every field is optional at parse time; a cache root can only be computed
/// once all three are present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetContext {
    /// The user owning the local working copy.
    #[serde(default)]
    pub user: Option<String>,
    /// The dataset namespace (usually the owner on the remote).
    #[serde(default)]
    pub namespace: Option<String>,
    /// The dataset name.
    #[serde(default)]
    pub dataset: Option<String>,
}

/// Parameters for background hashing.
#[derive(Debug, Clone, Deserialize)]
pub struct HashingConfig {
    /// Byte budget of a single hash job.
    #[serde(default = "default_max_job_bytes")]
    pub max_job_bytes: u64,
    /// Number of batches to start with when sharding hash work.
    #[serde(default = "default_num_cores")]
    pub num_cores: usize,
    /// Read block size for streamed digests.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// How long to wait for all hash jobs to finish.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// Delay between job status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl HashingConfig {
    /// Returns the job timeout as a [`Duration`].
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Returns the poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            max_job_bytes: default_max_job_bytes(),
            num_cores: default_num_cores(),
            block_size: default_block_size(),
            job_timeout_secs: default_job_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Lock settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Directory for lock files. Defaults to `<cache.base_dir>/locks`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Maximum time a blocking acquisition waits.
    #[serde(default = "default_lock_timeout_secs")]
    pub timeout_secs: u64,
}

impl LockConfig {
    /// Returns the acquisition timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: None,
            timeout_secs: default_lock_timeout_secs(),
        }
    }
}

/// Batching limits for push and pull.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Maximum number of objects in one transfer job.
    #[serde(default = "default_batch_max_objects")]
    pub batch_max_objects: usize,
    /// Maximum total bytes in one transfer job.
    #[serde(default = "default_batch_max_bytes")]
    pub batch_max_bytes: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_max_objects: default_batch_max_objects(),
            batch_max_bytes: default_batch_max_bytes(),
        }
    }
}

fn default_storage_backend() -> String {
    "local".to_string()
}

fn default_max_job_bytes() -> u64 {
    DEFAULT_MAX_JOB_BYTES
}

fn default_num_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_job_timeout_secs() -> u64 {
    3600
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_lock_timeout_secs() -> u64 {
    30
}

fn default_batch_max_objects() -> usize {
    100
}

fn default_batch_max_bytes() -> u64 {
    1_000_000_000
}
