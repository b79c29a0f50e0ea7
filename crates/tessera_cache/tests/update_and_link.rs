//! End-to-end tests for the update → link_revision cycle with background
//! hashing.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tessera_cache::{
    CacheError, HashScheduler, Manifest, StatusResult, VcsError, VersionControl, OBJECTS_DIR,
};
use tessera_common::ContentHash;
use tessera_config::{DatasetContext, EngineConfig};
use tessera_jobs::{
    DispatchError, Dispatcher, JobHandle, JobReporter, JobSnapshot, JobTask, LocalDispatcher,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct ScriptedVcs {
    revision: Mutex<String>,
}

impl VersionControl for ScriptedVcs {
    fn current_revision_id(&self) -> Result<String, VcsError> {
        Ok(self.revision.lock().clone())
    }

    fn diff_status(&self) -> Result<StatusResult, VcsError> {
        Ok(StatusResult::default())
    }
}

fn make_config(base: &Path, max_job_bytes: u64) -> EngineConfig {
    let mut config = EngineConfig::with_base_dir(base);
    config.context = DatasetContext {
        user: Some("bob".to_string()),
        namespace: Some("physics".to_string()),
        dataset: Some("runs".to_string()),
    };
    config.hashing.num_cores = 3;
    config.hashing.max_job_bytes = max_job_bytes;
    config.hashing.poll_interval_ms = 5;
    config.hashing.job_timeout_secs = 30;
    config
}

fn write_file(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let _ = fs::remove_file(&path);
    fs::write(path, content).unwrap();
}

fn open(
    base: &Path,
    revision: &str,
    dispatcher: Arc<dyn Dispatcher>,
) -> (Arc<ScriptedVcs>, Manifest) {
    let config = make_config(base, 4_096);
    let vcs = Arc::new(ScriptedVcs {
        revision: Mutex::new(revision.to_string()),
    });
    let scheduler = HashScheduler::new(dispatcher, &config.hashing);
    let manifest = Manifest::new(&config, vcs.clone())
        .unwrap()
        .with_scheduler(scheduler);
    (vcs, manifest)
}

/// Delegates to a [`LocalDispatcher`] but makes the `n`th submission panic.
struct CrashingDispatcher {
    inner: LocalDispatcher,
    crash_on: usize,
    submitted: AtomicUsize,
}

impl Dispatcher for CrashingDispatcher {
    fn submit(&self, name: &str, task: JobTask) -> Result<JobHandle, DispatchError> {
        let n = self.submitted.fetch_add(1, Ordering::SeqCst);
        if n == self.crash_on {
            drop(task);
            return self.inner.submit(
                name,
                Box::new(|_: &JobReporter| -> Result<(), String> { panic!("worker lost") }),
            );
        }
        self.inner.submit(name, task)
    }

    fn poll(&self, handle: &JobHandle) -> Result<JobSnapshot, DispatchError> {
        self.inner.poll(handle)
    }

    fn forget(&self, handle: &JobHandle) {
        self.inner.forget(handle);
    }
}

/// Delegates to a [`LocalDispatcher`] and rewrites one file once every
/// submitted job has finished, as if a user saved it between hashing and
/// ingest.
struct EditAfterHashing {
    inner: LocalDispatcher,
    submitted: Mutex<Vec<JobHandle>>,
    path: PathBuf,
    content: &'static [u8],
    edited: AtomicBool,
}

impl Dispatcher for EditAfterHashing {
    fn submit(&self, name: &str, task: JobTask) -> Result<JobHandle, DispatchError> {
        let handle = self.inner.submit(name, task)?;
        self.submitted.lock().push(handle.clone());
        Ok(handle)
    }

    fn poll(&self, handle: &JobHandle) -> Result<JobSnapshot, DispatchError> {
        let snapshot = self.inner.poll(handle)?;
        let all_done = self
            .submitted
            .lock()
            .iter()
            .all(|h| self.inner.poll(h).is_ok_and(|s| s.status.is_terminal()));
        if all_done && !self.edited.swap(true, Ordering::SeqCst) {
            let _ = fs::remove_file(&self.path);
            fs::write(&self.path, self.content).unwrap();
        }
        Ok(snapshot)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn sharded_update_then_link_is_byte_identical_to_pool() {
    let dir = tempfile::tempdir().unwrap();
    let (vcs, manifest) = open(dir.path(), "c0ffee", Arc::new(LocalDispatcher::new(3).unwrap()));
    let r1 = manifest.files_root().unwrap();

    for i in 0..12 {
        let size = 500 + i * 300;
        write_file(&r1, &format!("shard{}/f{i}.bin", i % 3), &vec![i as u8; size]);
    }
    write_file(&r1, "dup/a.bin", &[7u8; 800]);
    write_file(&r1, "dup/b.bin", &[7u8; 800]);

    let status = manifest.status().unwrap();
    let applied = manifest.update(&status).unwrap();
    assert_eq!(applied.created.len(), 12 + 2 + 4);
    assert!(manifest.status().unwrap().is_empty());

    manifest.link_revision().unwrap();
    *vcs.revision.lock() = "beef01".to_string();
    write_file(&r1, "late.txt", b"added after first link");
    manifest.update(&manifest.status().unwrap()).unwrap();
    let r2 = manifest.link_revision().unwrap();

    assert!(!r1.exists(), "previous revision directory must be removed");
    let objects = manifest.cache_root().unwrap().join(OBJECTS_DIR);
    for entry in manifest.list("").unwrap() {
        let on_disk = r2.join(entry.relative_path.trim_end_matches('/'));
        if entry.is_dir {
            assert!(on_disk.is_dir(), "{} missing", entry.relative_path);
            continue;
        }
        let object = objects.join(entry.content_hash.unwrap().to_string());
        assert_eq!(fs::read(&on_disk).unwrap(), fs::read(&object).unwrap());
    }
    assert_eq!(
        manifest.get("dup/a.bin").unwrap().content_hash,
        manifest.get("dup/b.bin").unwrap().content_hash
    );
}

#[test]
fn crashed_hash_job_commits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = Arc::new(CrashingDispatcher {
        inner: LocalDispatcher::new(2).unwrap(),
        crash_on: 1,
        submitted: AtomicUsize::new(0),
    });
    let (_vcs, manifest) = open(dir.path(), "r1", dispatcher);
    let root = manifest.files_root().unwrap();
    for i in 0..6 {
        write_file(&root, &format!("f{i}.bin"), &vec![1u8; 2_000]);
    }

    let err = manifest.update(&manifest.status().unwrap()).unwrap_err();
    assert!(matches!(err, CacheError::HashJobsFailed { failed: 1, .. }));
    assert!(manifest.list("").unwrap().is_empty());
    assert!(!manifest.cache_root().unwrap().join("manifest.json").exists());
}

#[test]
fn repository_lock_excludes_concurrent_update() {
    let dir = tempfile::tempdir().unwrap();
    let config = make_config(dir.path(), 4_096);
    let lock = tessera_lock::RepositoryLock::new(
        &config.lock_dir(),
        &dir.path()
            .join("local/bob/physics/runs")
            .to_string_lossy(),
    );

    let (_vcs, manifest) = open(dir.path(), "r1", Arc::new(LocalDispatcher::new(1).unwrap()));
    let root = manifest.files_root().unwrap();
    write_file(&root, "a.txt", b"a");

    // A holder on another thread stands in for another process.
    let (held_tx, held_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let holder = std::thread::spawn(move || {
        let _guard = lock
            .acquire(true, std::time::Duration::from_secs(1))
            .unwrap();
        held_tx.send(()).unwrap();
        release_rx.recv().unwrap();
    });
    held_rx.recv().unwrap();

    let mut fast_config = make_config(dir.path(), 4_096);
    fast_config.locks.timeout_secs = 1;
    let vcs = Arc::new(ScriptedVcs {
        revision: Mutex::new("r1".to_string()),
    });
    let contender = Manifest::new(&fast_config, vcs).unwrap();
    let err = contender.update(&manifest.status().unwrap()).unwrap_err();
    assert!(matches!(err, CacheError::Lock(ref e) if e.is_timeout()));

    release_tx.send(()).unwrap();
    holder.join().unwrap();
    assert_eq!(contender.update(&manifest.status().unwrap()).unwrap().created, vec!["a.txt"]);
}

#[test]
fn file_edited_after_hashing_is_not_stored_under_the_old_hash() {
    let dir = tempfile::tempdir().unwrap();
    let config = make_config(dir.path(), 4_096);
    let vcs = Arc::new(ScriptedVcs {
        revision: Mutex::new("r1".to_string()),
    });
    let root = Manifest::new(&config, vcs.clone()).unwrap().files_root().unwrap();
    write_file(&root, "a.txt", b"original");
    write_file(&root, "b.txt", b"untouched");

    let dispatcher = Arc::new(EditAfterHashing {
        inner: LocalDispatcher::new(1).unwrap(),
        submitted: Mutex::new(Vec::new()),
        path: root.join("a.txt"),
        content: b"EDITED",
        edited: AtomicBool::new(false),
    });
    let manifest = Manifest::new(&config, vcs)
        .unwrap()
        .with_scheduler(HashScheduler::new(dispatcher, &config.hashing));
    let status = manifest.status().unwrap();
    let applied = manifest.update(&status).unwrap();

    assert_eq!(applied.created, vec!["b.txt"]);
    assert!(matches!(
        manifest.get("a.txt"),
        Err(CacheError::UnknownPath { .. })
    ));
    let objects = manifest.cache_root().unwrap().join(OBJECTS_DIR);
    for entry in fs::read_dir(&objects).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().into_owned();
        let digest = ContentHash::from_bytes(&fs::read(entry.path()).unwrap());
        assert_eq!(name, digest.to_string(), "pool object named by the wrong hash");
    }

    let retry = manifest.update(&manifest.status().unwrap()).unwrap();
    assert_eq!(retry.created, vec!["a.txt"]);
    assert_eq!(
        manifest.get("a.txt").unwrap().content_hash,
        Some(ContentHash::from_bytes(b"EDITED"))
    );
}
