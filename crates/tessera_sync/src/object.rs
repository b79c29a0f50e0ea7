//! Objects slated for transfer and the outcome of a transfer.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tessera_common::ContentHash;

use crate::backend::StorageBackend;
use crate::error::StorageError;

/// One content-addressed object moving between the local pool and remote
/// storage.
pub trait TransferObject:
    Clone + PartialEq + std::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Job name used when submitting batches of this kind.
    const KIND: &'static str;

    /// Past-tense verb used in transfer summaries.
    const VERB: &'static str;

    /// Builds an object from its three fields.
    fn from_parts(object_path: String, dataset_path: String, revision: String) -> Self;

    /// Path of the object in the local pool; its file name is the content hash.
    fn object_path(&self) -> &str;

    /// Logical path of the file within the dataset.
    fn dataset_path(&self) -> &str;

    /// Revision the object belongs to.
    fn revision(&self) -> &str;

    /// Bytes expected to move, used to size batches. Zero if unknown.
    fn size_hint(&self) -> u64;

    /// Moves the object and returns the number of bytes transferred.
    fn transfer(&self, backend: &dyn StorageBackend) -> Result<u64, StorageError>;

    /// Returns the content hash named by the object path.
    fn content_hash(&self) -> Result<ContentHash, StorageError> {
        Path::new(self.object_path())
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.parse().ok())
            .ok_or_else(|| StorageError::InvalidObjectPath {
                path: self.object_path().to_string(),
            })
    }
}

macro_rules! transfer_object {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name {
            /// Path of the object in the local pool.
            pub object_path: String,
            /// Logical path of the file within the dataset.
            pub dataset_path: String,
            /// Revision the object belongs to.
            pub revision: String,
        }

        impl $name {
            /// Creates an object description.
            pub fn new(
                object_path: impl Into<String>,
                dataset_path: impl Into<String>,
                revision: impl Into<String>,
            ) -> Self {
                Self {
                    object_path: object_path.into(),
                    dataset_path: dataset_path.into(),
                    revision: revision.into(),
                }
            }
        }
    };
}

transfer_object!(
    /// An object to upload from the local pool.
    PushObject
);

transfer_object!(
    /// An object to download into the local pool.
    PullObject
);

impl TransferObject for PushObject {
    const KIND: &'static str = "push";
    const VERB: &'static str = "Uploaded";

    fn from_parts(object_path: String, dataset_path: String, revision: String) -> Self {
        Self::new(object_path, dataset_path, revision)
    }

    fn object_path(&self) -> &str {
        &self.object_path
    }

    fn dataset_path(&self) -> &str {
        &self.dataset_path
    }

    fn revision(&self) -> &str {
        &self.revision
    }

    fn size_hint(&self) -> u64 {
        std::fs::metadata(&self.object_path).map_or(0, |m| m.len())
    }

    fn transfer(&self, backend: &dyn StorageBackend) -> Result<u64, StorageError> {
        let hash = self.content_hash()?;
        let data = std::fs::read(&self.object_path).map_err(|source| StorageError::Io {
            path: self.object_path.clone().into(),
            source,
        })?;
        backend.push_object(&hash, &data)?;
        Ok(data.len() as u64)
    }
}

impl TransferObject for PullObject {
    const KIND: &'static str = "pull";
    const VERB: &'static str = "Downloaded";

    fn from_parts(object_path: String, dataset_path: String, revision: String) -> Self {
        Self::new(object_path, dataset_path, revision)
    }

    fn object_path(&self) -> &str {
        &self.object_path
    }

    fn dataset_path(&self) -> &str {
        &self.dataset_path
    }

    fn revision(&self) -> &str {
        &self.revision
    }

    fn size_hint(&self) -> u64 {
        0
    }

    fn transfer(&self, backend: &dyn StorageBackend) -> Result<u64, StorageError> {
        let hash = self.content_hash()?;
        let data = backend.pull_object(&hash)?;
        let pool_dir = Path::new(&self.object_path)
            .parent()
            .ok_or_else(|| StorageError::InvalidObjectPath {
                path: self.object_path.clone(),
            })?;
        tessera_cache::ObjectPool::new(pool_dir).write(&hash, &data)?;
        Ok(data.len() as u64)
    }
}

/// Terminal outcome of one or more transfer batches.
///
/// Partial success is an ordinary outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferResult<T> {
    /// Objects that were transferred.
    pub success: Vec<T>,
    /// Objects that were not transferred and can be resubmitted.
    pub failure: Vec<T>,
    /// Human-readable summary.
    pub message: String,
}

/// Outcome of an upload.
pub type PushResult = TransferResult<PushObject>;
/// Outcome of a download.
pub type PullResult = TransferResult<PullObject>;

impl<T> Default for TransferResult<T> {
    fn default() -> Self {
        Self {
            success: Vec::new(),
            failure: Vec::new(),
            message: String::new(),
        }
    }
}

impl<T: PartialEq> TransferResult<T> {
    /// Returns `true` if nothing failed.
    pub fn is_complete(&self) -> bool {
        self.failure.is_empty()
    }

    /// Folds in the result of resubmitting this result's failures.
    ///
    /// Successes accumulate; only what failed again stays in `failure`.
    pub fn merge_retry(mut self, retry: TransferResult<T>) -> Self {
        for object in retry.success {
            if !self.success.contains(&object) {
                self.success.push(object);
            }
        }
        self.failure = retry.failure;
        self.message = retry.message;
        self
    }

    /// Appends another batch's result.
    pub(crate) fn absorb(&mut self, other: TransferResult<T>) {
        self.success.extend(other.success);
        self.failure.extend(other.failure);
    }
}
