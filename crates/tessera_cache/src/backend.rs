//! Cache root layout and provisioning.
//!
//! A cache root holds a flat `objects/` pool of content-addressed blobs and
//! one directory per materialized revision:
//!
//! ```text
//! <cache_root>/
//!     objects/<content-hash>
//!     <revision-id>/<logical path>   (hard links into objects/)
//!     manifest.json
//! ```

use std::path::PathBuf;

use tessera_config::{CacheBackendKind, DatasetContext, EngineConfig};

use crate::error::CacheError;
use crate::vcs::VersionControl;

/// Name of the object pool directory inside a cache root.
pub const OBJECTS_DIR: &str = "objects";

/// A cache layout: where a dataset's cache root lives.
///
/// Implementations only decide the root; everything below it is fixed.
pub trait CacheBackend: Send + Sync {
    /// Returns the cache root for the configured dataset.
    ///
    /// Fails with [`CacheError::MissingContext`] if the dataset identity is
    /// incomplete.
    fn cache_root(&self) -> Result<PathBuf, CacheError>;

    /// Creates the cache root and its object pool if missing. Idempotent.
    fn initialize(&self) -> Result<(), CacheError> {
        let objects = self.objects_dir()?;
        std::fs::create_dir_all(&objects).map_err(CacheError::io(&objects))
    }

    /// Returns `<cache_root>/objects`.
    fn objects_dir(&self) -> Result<PathBuf, CacheError> {
        Ok(self.cache_root()?.join(OBJECTS_DIR))
    }

    /// Returns `<cache_root>/<revision>`.
    fn revision_dir(&self, revision: &str) -> Result<PathBuf, CacheError> {
        Ok(self.cache_root()?.join(revision))
    }

    /// Returns the directory of the revision currently checked out.
    fn current_revision_dir(&self, vcs: &dyn VersionControl) -> Result<PathBuf, CacheError> {
        let revision = vcs.current_revision_id()?;
        self.revision_dir(&revision)
    }
}

/// Cache roots on the host filesystem, one per
/// `(storage backend, user, namespace, dataset)`.
#[derive(Debug, Clone)]
pub struct HostFilesystemCache {
    base_dir: PathBuf,
    storage_backend: String,
    context: DatasetContext,
}

impl HostFilesystemCache {
    /// Creates a layout rooted at `base_dir`.
    pub fn new(
        base_dir: impl Into<PathBuf>,
        storage_backend: &str,
        context: DatasetContext,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            storage_backend: storage_backend.to_string(),
            context,
        }
    }
}

fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, CacheError> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(CacheError::MissingContext { field }),
    }
}

impl CacheBackend for HostFilesystemCache {
    fn cache_root(&self) -> Result<PathBuf, CacheError> {
        let user = required(&self.context.user, "user")?;
        let namespace = required(&self.context.namespace, "namespace")?;
        let dataset = required(&self.context.dataset, "dataset")?;
        Ok(self
            .base_dir
            .join(&self.storage_backend)
            .join(user)
            .join(namespace)
            .join(dataset))
    }
}

/// Builds the cache layout selected in the configuration.
pub fn cache_backend(config: &EngineConfig) -> Box<dyn CacheBackend> {
    match config.cache.backend {
        CacheBackendKind::HostFilesystem => Box::new(HostFilesystemCache::new(
            &config.cache.base_dir,
            &config.cache.storage_backend,
            config.context.clone(),
        )),
    }
}
