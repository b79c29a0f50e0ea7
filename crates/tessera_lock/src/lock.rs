//! File-backed lock implementation shared by both lock flavors.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use fs4::FileExt;
use parking_lot::Mutex;
use tessera_common::ContentHash;
use tracing::{debug, warn};

use crate::error::LockError;

/// Delay between attempts while a blocking acquisition waits.
const RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Observable state of a lock instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Not held by this instance and nobody is waiting on it.
    Unlocked,
    /// At least one thread is waiting to acquire it.
    Acquiring,
    /// Held by this instance.
    Locked,
}

/// The OS-level hold on a lock file.
struct Held {
    file: File,
    owner: ThreadId,
    depth: usize,
}

/// A named lock file in the lock directory.
struct LockFile {
    path: PathBuf,
    scope: String,
    held: Mutex<Option<Held>>,
    waiters: AtomicUsize,
}

impl LockFile {
    fn new(lock_dir: &Path, prefix: &str, key: &str, scope: String) -> Self {
        let digest = ContentHash::from_bytes(key.as_bytes()).to_string();
        Self {
            path: lock_dir.join(format!("{prefix}-{}.lock", &digest[..32])),
            scope,
            held: Mutex::new(None),
            waiters: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> LockState {
        if self.held.lock().is_some() {
            LockState::Locked
        } else if self.waiters.load(Ordering::SeqCst) > 0 {
            LockState::Acquiring
        } else {
            LockState::Unlocked
        }
    }

    fn acquire(&self, failfast: bool, timeout: Duration) -> Result<(), LockError> {
        let me = thread::current().id();
        if let Some(held) = self.held.lock().as_mut() {
            if held.owner == me {
                held.depth += 1;
                return Ok(());
            }
        }

        self.waiters.fetch_add(1, Ordering::SeqCst);
        let result = self.lock_os_file(failfast, timeout);
        self.waiters.fetch_sub(1, Ordering::SeqCst);

        let file = result?;
        *self.held.lock() = Some(Held {
            file,
            owner: me,
            depth: 1,
        });
        debug!(scope = %self.scope, path = %self.path.display(), "lock acquired");
        Ok(())
    }

    fn lock_os_file(&self, failfast: bool, timeout: Duration) -> Result<File, LockError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LockError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| LockError::Io {
                path: self.path.clone(),
                source: e,
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(file),
                Err(err) if is_contended(&err) => {
                    if failfast {
                        return Err(LockError::Locked {
                            scope: self.scope.clone(),
                        });
                    }
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(LockError::Timeout {
                            scope: self.scope.clone(),
                            timeout,
                        });
                    }
                    thread::sleep(RETRY_INTERVAL.min(deadline - now));
                }
                Err(err) => {
                    return Err(LockError::Io {
                        path: self.path.clone(),
                        source: err,
                    })
                }
            }
        }
    }

    fn release(&self) {
        let mut slot = self.held.lock();
        let Some(held) = slot.as_mut() else {
            debug!(scope = %self.scope, "release of a lock that is not held; ignoring");
            return;
        };
        if held.owner != thread::current().id() {
            warn!(
                scope = %self.scope,
                "release from a thread that does not hold the lock; ignoring"
            );
            return;
        }
        if held.depth > 1 {
            held.depth -= 1;
            return;
        }
        if let Some(held) = slot.take() {
            if let Err(err) = FileExt::unlock(&held.file) {
                // Closing the handle below still drops the OS lock.
                warn!(scope = %self.scope, %err, "failed to unlock lock file");
            }
            debug!(scope = %self.scope, "lock released");
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs4::lock_contended_error().raw_os_error()
}

/// Scoped hold on a lock; releases it when dropped.
///
/// Guards are tied to the thread that acquired them and cannot be sent to
/// another thread.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    lock: &'a LockFile,
    _not_send: PhantomData<*const ()>,
}

impl LockGuard<'_> {
    /// Returns the path of the underlying lock file.
    pub fn path(&self) -> &Path {
        &self.lock.path
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

macro_rules! lock_flavor {
    ($name:ident) => {
        impl $name {
            /// Acquires the lock and returns a guard that releases it on drop.
            ///
            /// With `failfast` set, contention fails immediately with
            /// [`LockError::Locked`]; otherwise the call waits up to `timeout`
            /// and fails with [`LockError::Timeout`]. Acquiring again on the
            /// thread that already holds this instance nests instead of
            /// deadlocking.
            pub fn acquire(
                &self,
                failfast: bool,
                timeout: Duration,
            ) -> Result<LockGuard<'_>, LockError> {
                self.inner.acquire(failfast, timeout)?;
                Ok(LockGuard {
                    lock: &self.inner,
                    _not_send: PhantomData,
                })
            }

            /// Releases one level of hold. Releasing a lock that is not held is
            /// a logged no-op.
            pub fn release(&self) {
                self.inner.release();
            }

            /// Runs `f` while holding the lock, releasing it on every exit path.
            pub fn with_lock<T, E, F>(
                &self,
                failfast: bool,
                timeout: Duration,
                f: F,
            ) -> Result<T, E>
            where
                E: From<LockError>,
                F: FnOnce() -> Result<T, E>,
            {
                let _guard = self.acquire(failfast, timeout)?;
                f()
            }

            /// Returns the current state of this instance.
            pub fn state(&self) -> LockState {
                self.inner.state()
            }

            /// Returns the path of the underlying lock file.
            pub fn path(&self) -> &Path {
                &self.inner.path
            }
        }
    };
}

/// Write lock scoped to one file name.
pub struct FileWriteLock {
    inner: LockFile,
}

impl FileWriteLock {
    /// Creates a lock for `filename` with its lock file in `lock_dir`.
    ///
    /// Every process that constructs a lock for the same file name and lock
    /// directory contends on the same lock file.
    pub fn new(lock_dir: &Path, filename: impl AsRef<Path>) -> Self {
        let key = filename.as_ref().to_string_lossy().into_owned();
        let scope = format!("file {key}");
        Self {
            inner: LockFile::new(lock_dir, "file", &key, scope),
        }
    }
}

lock_flavor!(FileWriteLock);

/// Lock scoped to a whole repository; excludes every mutating cache or
/// manifest operation on that repository.
pub struct RepositoryLock {
    inner: LockFile,
}

impl RepositoryLock {
    /// Creates a lock for the repository identified by `repo_key`.
    pub fn new(lock_dir: &Path, repo_key: &str) -> Self {
        Self {
            inner: LockFile::new(lock_dir, "repo", repo_key, format!("repository {repo_key}")),
        }
    }
}

lock_flavor!(RepositoryLock);
