//! The flat, content-addressed object pool.
//!
//! Each unique content hash is stored once as `objects/<hash>`. Objects are
//! written under a dot-prefixed temporary name and renamed into place, so a
//! reader never observes a partial object. Objects are made read-only; revision
//! directories hard-link to them, so an in-place edit would corrupt every
//! revision sharing the object.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tessera_common::{ContentHash, ContentHasher};
use tracing::debug;

use crate::error::CacheError;

/// Read size used when copying a file into the pool.
const COPY_BLOCK: usize = 64 * 1024;

/// Handle on one cache root's `objects/` directory.
#[derive(Debug, Clone)]
pub struct ObjectPool {
    dir: PathBuf,
}

impl ObjectPool {
    /// Creates a handle on `objects_dir`. The directory is created lazily.
    pub fn new(objects_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: objects_dir.into(),
        }
    }

    /// Returns the pool directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the object for `hash`.
    pub fn object_path(&self, hash: &ContentHash) -> PathBuf {
        self.dir.join(hash.to_string())
    }

    /// Returns `true` if the object for `hash` is present.
    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.object_path(hash).is_file()
    }

    /// Copies `source` into the pool as the object for `hash`.
    ///
    /// Returns `false` if the object was already present. The bytes are
    /// digested while they are copied; if they do not hash to `hash` (the
    /// file changed after it was hashed) nothing is stored and
    /// [`CacheError::ContentMismatch`] is returned.
    pub fn ingest(&self, source: &Path, hash: &ContentHash) -> Result<bool, CacheError> {
        let added = self.store(hash, |tmp, tmp_path| {
            let mut src = File::open(source).map_err(CacheError::io(source))?;
            let mut hasher = ContentHasher::new();
            let mut buf = vec![0u8; COPY_BLOCK];
            loop {
                let n = match src.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        return Err(CacheError::Io {
                            path: source.to_path_buf(),
                            source: err,
                        })
                    }
                };
                hasher.update(&buf[..n]);
                tmp.write_all(&buf[..n]).map_err(CacheError::io(tmp_path))?;
            }
            Ok(hasher.finalize())
        })?;
        if added {
            debug!(%hash, source = %source.display(), "object ingested");
        }
        Ok(added)
    }

    /// Stores `data` as the object for `hash`, like [`ObjectPool::ingest`].
    pub fn write(&self, hash: &ContentHash, data: &[u8]) -> Result<bool, CacheError> {
        self.store(hash, |tmp, tmp_path| {
            tmp.write_all(data).map_err(CacheError::io(tmp_path))?;
            Ok(ContentHash::from_bytes(data))
        })
    }

    /// Fills a temporary file private to this process and thread, checks the
    /// digest `fill` reports, and renames the file into place.
    fn store(
        &self,
        hash: &ContentHash,
        fill: impl FnOnce(&mut File, &Path) -> Result<ContentHash, CacheError>,
    ) -> Result<bool, CacheError> {
        let dest = self.object_path(hash);
        if dest.is_file() {
            return Ok(false);
        }
        fs::create_dir_all(&self.dir).map_err(CacheError::io(&self.dir))?;

        let tmp = self.dir.join(format!(
            ".incoming-{hash}-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let written = File::create(&tmp)
            .map_err(CacheError::io(&tmp))
            .and_then(|mut file| {
                let actual = fill(&mut file, &tmp)?;
                file.sync_all().map_err(CacheError::io(&tmp))?;
                Ok(actual)
            })
            .and_then(|actual| {
                if actual == *hash {
                    Ok(())
                } else {
                    Err(CacheError::ContentMismatch {
                        expected: *hash,
                        actual,
                    })
                }
            })
            .and_then(|_| make_read_only(&tmp))
            .and_then(|_| fs::rename(&tmp, &dest).map_err(CacheError::io(&dest)));
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        Ok(true)
    }

    /// Reads the object for `hash`.
    pub fn read(&self, hash: &ContentHash) -> Result<Vec<u8>, CacheError> {
        let path = self.object_path(hash);
        fs::read(&path).map_err(CacheError::io(path))
    }

    /// Materializes the object for `hash` at `dest` as a hard link, falling
    /// back to a copy where hard links are unsupported.
    pub fn link_into(&self, hash: &ContentHash, dest: &Path) -> Result<(), CacheError> {
        let object = self.object_path(hash);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(CacheError::io(parent))?;
        }
        match fs::hard_link(&object, dest) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(CacheError::Io {
                path: object,
                source: err,
            }),
            Err(err) => {
                debug!(%hash, %err, "hard link failed; copying object");
                fs::copy(&object, dest)
                    .map(|_| ())
                    .map_err(CacheError::io(dest))
            }
        }
    }

    /// Deletes objects that are not in `referenced` and are not linked from
    /// any revision directory. Returns the hashes removed.
    ///
    /// Temporary files and names that are not content hashes are left alone.
    pub fn sweep(&self, referenced: &HashSet<ContentHash>) -> Result<Vec<ContentHash>, CacheError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(CacheError::Io {
                    path: self.dir.clone(),
                    source: err,
                })
            }
        };

        let mut removed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(CacheError::io(&self.dir))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let Ok(hash) = name.parse::<ContentHash>() else {
                debug!(name, "ignoring foreign file in object pool");
                continue;
            };
            if referenced.contains(&hash) {
                continue;
            }
            let path = entry.path();
            let metadata = fs::metadata(&path).map_err(CacheError::io(&path))?;
            if link_count(&metadata) > 1 {
                continue;
            }
            fs::remove_file(&path).map_err(CacheError::io(&path))?;
            debug!(%hash, "object swept");
            removed.push(hash);
        }
        removed.sort();
        Ok(removed)
    }
}

fn make_read_only(path: &Path) -> Result<(), CacheError> {
    let mut perms = fs::metadata(path).map_err(CacheError::io(path))?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms).map_err(CacheError::io(path))
}

#[cfg(unix)]
fn link_count(metadata: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.nlink()
}

#[cfg(not(unix))]
fn link_count(_metadata: &fs::Metadata) -> u64 {
    1
}
