//! The storage-backend capability and a directory-backed implementation.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tessera_common::ContentHash;
use tracing::debug;

use crate::error::StorageError;

/// Remote object storage, addressed by content hash.
///
/// Implementations are called from transfer jobs and may be called from
/// several workers at once.
pub trait StorageBackend: Send + Sync {
    /// Short name used in logs and transfer messages.
    fn name(&self) -> &str;

    /// Stores `data` under `hash`. Storing an object that already exists
    /// succeeds.
    fn push_object(&self, hash: &ContentHash, data: &[u8]) -> Result<(), StorageError>;

    /// Fetches the object stored under `hash`.
    fn pull_object(&self, hash: &ContentHash) -> Result<Vec<u8>, StorageError>;

    /// Returns `true` if an object is stored under `hash`.
    fn contains(&self, hash: &ContentHash) -> Result<bool, StorageError>;
}

/// Uses a plain directory as the remote store: `<remote>/<content-hash>`.
///
/// Pulled bytes are re-hashed and rejected if they do not match the key.
#[derive(Debug, Clone)]
pub struct LocalDirectoryBackend {
    remote: PathBuf,
}

impl LocalDirectoryBackend {
    /// Creates a backend storing objects directly under `remote`.
    pub fn new(remote: impl Into<PathBuf>) -> Self {
        Self {
            remote: remote.into(),
        }
    }

    /// Returns the remote directory.
    pub fn remote(&self) -> &Path {
        &self.remote
    }

    fn object_path(&self, hash: &ContentHash) -> PathBuf {
        self.remote.join(hash.to_string())
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl StorageBackend for LocalDirectoryBackend {
    fn name(&self) -> &str {
        "local-directory"
    }

    fn push_object(&self, hash: &ContentHash, data: &[u8]) -> Result<(), StorageError> {
        let dest = self.object_path(hash);
        if dest.is_file() {
            debug!(%hash, "object already in remote store");
            return Ok(());
        }
        fs::create_dir_all(&self.remote).map_err(io_error(&self.remote))?;
        let tmp = self
            .remote
            .join(format!(".upload-{hash}-{:?}", std::thread::current().id()));
        fs::write(&tmp, data).map_err(io_error(&tmp))?;
        fs::rename(&tmp, &dest).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StorageError::Io {
                path: dest.clone(),
                source: e,
            }
        })
    }

    fn pull_object(&self, hash: &ContentHash) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(hash);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    key: hash.to_string(),
                })
            }
            Err(err) => return Err(StorageError::Io { path, source: err }),
        };
        let actual = ContentHash::from_bytes(&data);
        if actual != *hash {
            return Err(StorageError::Corrupt {
                key: hash.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(data)
    }

    fn contains(&self, hash: &ContentHash) -> Result<bool, StorageError> {
        Ok(self.object_path(hash).is_file())
    }
}
