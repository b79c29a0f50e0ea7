//! Two-tier file hashing.
//!
//! The fast hash is a `path||size||mtime` fingerprint used to skip re-hashing
//! files that have not been touched. The content hash is a streamed SHA-256
//! digest used for content addressing. Directories have no content, so their
//! "content hash" is the digest of their relative path.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use rayon::prelude::*;
use tessera_common::{ContentHash, ContentHasher};
use tracing::warn;

/// Computes fast and content hashes for paths relative to a files root.
#[derive(Debug, Clone)]
pub struct SmartHash {
    files_root: PathBuf,
    block_size: usize,
}

impl SmartHash {
    /// Creates a hasher rooted at `files_root` reading `block_size` bytes at a time.
    pub fn new(files_root: impl Into<PathBuf>, block_size: usize) -> Self {
        Self {
            files_root: files_root.into(),
            block_size: block_size.max(1),
        }
    }

    /// Returns the directory that relative paths are resolved against.
    pub fn files_root(&self) -> &Path {
        &self.files_root
    }

    /// Resolves a manifest-relative path (directories end in `/`) on disk.
    pub fn resolve(&self, relative_path: &str) -> PathBuf {
        let trimmed = relative_path.trim_start_matches('/').trim_end_matches('/');
        self.files_root.join(trimmed)
    }

    /// Returns `"<path>||<size>||<mtime>"`, or `None` if the path does not exist.
    ///
    /// Not a content digest: two calls on an untouched file agree, and any
    /// change to size or modification time changes the result.
    pub fn fast_hash(&self, relative_path: &str) -> Option<String> {
        let metadata = std::fs::metadata(self.resolve(relative_path)).ok()?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| format!("{}.{:09}", d.as_secs(), d.subsec_nanos()))
            .unwrap_or_else(|| "0".to_string());
        Some(format!("{relative_path}||{}||{mtime}", metadata.len()))
    }

    /// Streams the file through SHA-256 in `block_size` reads.
    ///
    /// Returns `None` if the path does not exist or cannot be read; read
    /// failures are logged, never raised.
    pub fn compute_file_hash(&self, relative_path: &str, block_size: usize) -> Option<ContentHash> {
        let path = self.resolve(relative_path);
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to stat file for hashing");
                return None;
            }
        };
        if metadata.is_dir() {
            return Some(ContentHash::from_bytes(relative_path.as_bytes()));
        }
        match digest_file(&path, block_size.max(1)) {
            Ok(hash) => Some(hash),
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to hash file");
                None
            }
        }
    }

    /// Hashes many paths in parallel; result `i` belongs to `paths[i]`.
    pub fn compute_file_hashes(&self, paths: &[String]) -> Vec<Option<ContentHash>> {
        paths
            .par_iter()
            .map(|p| self.compute_file_hash(p, self.block_size))
            .collect()
    }

    /// Fast-hashes many paths; result `i` belongs to `paths[i]`.
    pub fn fast_hashes(&self, paths: &[String]) -> Vec<Option<String>> {
        paths.iter().map(|p| self.fast_hash(p)).collect()
    }
}

fn digest_file(path: &Path, block_size: usize) -> std::io::Result<ContentHash> {
    let mut file = File::open(path)?;
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; block_size];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn setup() -> (tempfile::TempDir, SmartHash) {
        let dir = tempfile::tempdir().unwrap();
        let hasher = SmartHash::new(dir.path(), 7);
        (dir, hasher)
    }

    #[test]
    fn fast_hash_missing_is_none() {
        let (_dir, hasher) = setup();
        assert!(hasher.fast_hash("nope.txt").is_none());
    }

    #[test]
    fn fast_hash_stable_without_changes() {
        let (dir, hasher) = setup();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        let first = hasher.fast_hash("a.txt").unwrap();
        assert_eq!(first, hasher.fast_hash("a.txt").unwrap());
        assert!(first.starts_with("a.txt||5||"));
    }

    #[test]
    fn fast_hash_changes_with_size() {
        let (dir, hasher) = setup();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello").unwrap();
        let before = hasher.fast_hash("a.txt").unwrap();
        std::fs::write(&path, "hello world").unwrap();
        assert_ne!(before, hasher.fast_hash("a.txt").unwrap());
    }

    #[test]
    fn fast_hash_changes_with_mtime() {
        let (dir, hasher) = setup();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello").unwrap();
        let before = hasher.fast_hash("a.txt").unwrap();
        let file = File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(120))
            .unwrap();
        assert_ne!(before, hasher.fast_hash("a.txt").unwrap());
    }

    #[test]
    fn content_hash_matches_one_shot_digest() {
        let (dir, hasher) = setup();
        let data = b"block boundaries should not matter at all";
        std::fs::write(dir.path().join("a.bin"), data).unwrap();
        assert_eq!(
            hasher.compute_file_hash("a.bin", 7),
            Some(ContentHash::from_bytes(data))
        );
        assert_eq!(
            hasher.compute_file_hash("a.bin", 4096),
            Some(ContentHash::from_bytes(data))
        );
    }

    #[test]
    fn identical_content_identical_hash() {
        let (dir, hasher) = setup();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("one.csv"), "1,2,3\n").unwrap();
        std::fs::write(dir.path().join("sub/two.csv"), "1,2,3\n").unwrap();
        assert_eq!(
            hasher.compute_file_hash("one.csv", 64),
            hasher.compute_file_hash("sub/two.csv", 64)
        );
    }

    #[test]
    fn directory_hash_is_path_digest() {
        let (dir, hasher) = setup();
        std::fs::create_dir_all(dir.path().join("raw/2024")).unwrap();
        let h = hasher.compute_file_hash("raw/2024/", 64).unwrap();
        assert_eq!(h, ContentHash::from_bytes(b"raw/2024/"));
        std::fs::write(dir.path().join("raw/2024/x.txt"), "x").unwrap();
        assert_eq!(hasher.compute_file_hash("raw/2024/", 64), Some(h));
    }

    #[test]
    fn missing_file_hash_is_none() {
        let (_dir, hasher) = setup();
        assert!(hasher.compute_file_hash("gone.txt", 64).is_none());
    }

    #[test]
    fn parallel_hashes_preserve_order() {
        let (dir, hasher) = setup();
        let mut paths = Vec::new();
        for i in 0..32 {
            let name = format!("f{i}.txt");
            std::fs::write(dir.path().join(&name), format!("content {i}")).unwrap();
            paths.push(name);
        }
        paths.insert(5, "missing.txt".to_string());

        let hashes = hasher.compute_file_hashes(&paths);
        assert_eq!(hashes.len(), paths.len());
        assert!(hashes[5].is_none());
        for (path, hash) in paths.iter().zip(&hashes) {
            if path == "missing.txt" {
                continue;
            }
            let i: usize = path[1..path.len() - 4].parse().unwrap();
            let expected = ContentHash::from_bytes(format!("content {i}").as_bytes());
            assert_eq!(hash.as_ref(), Some(&expected));
        }

        let fast = hasher.fast_hashes(&paths);
        assert!(fast[5].is_none());
        assert!(fast[0].as_deref().unwrap().starts_with("f0.txt||"));
    }
}
