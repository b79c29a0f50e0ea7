//! Cross-process lock behavior.
//!
//! The parent tests re-execute this test binary, selecting one of the
//! `child_*` tests and configuring it through environment variables. Without
//! those variables the child tests return immediately.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::thread;
use std::time::Duration;

use tessera_lock::{FileWriteLock, RepositoryLock};

const ENV_LOCK_DIR: &str = "TESSERA_TEST_LOCK_DIR";
const ENV_TARGET: &str = "TESSERA_TEST_TARGET";
const ENV_WRITER_ID: &str = "TESSERA_TEST_WRITER_ID";
const ENV_START_DELAY_MS: &str = "TESSERA_TEST_START_DELAY_MS";
const ENV_EXPECT: &str = "TESSERA_TEST_EXPECT";

fn spawn_child(test_name: &str, envs: &[(&str, String)]) -> Child {
    let exe = std::env::current_exe().unwrap();
    let mut cmd = Command::new(exe);
    cmd.args([test_name, "--exact", "--nocapture", "--test-threads=1"]);
    for (key, value) in envs {
        cmd.env(key, value);
    }
    cmd.spawn().unwrap()
}

fn writer_envs(
    lock_dir: &Path,
    target: &Path,
    id: u32,
    delay_ms: u64,
) -> Vec<(&'static str, String)> {
    vec![
        (ENV_LOCK_DIR, lock_dir.display().to_string()),
        (ENV_TARGET, target.display().to_string()),
        (ENV_WRITER_ID, id.to_string()),
        (ENV_START_DELAY_MS, delay_ms.to_string()),
    ]
}

#[test]
fn child_writer() {
    let Ok(lock_dir) = std::env::var(ENV_LOCK_DIR) else {
        return;
    };
    let target = PathBuf::from(std::env::var(ENV_TARGET).unwrap());
    let id: u32 = std::env::var(ENV_WRITER_ID).unwrap().parse().unwrap();
    let delay: u64 = std::env::var(ENV_START_DELAY_MS).unwrap().parse().unwrap();

    thread::sleep(Duration::from_millis(delay));

    let lock = FileWriteLock::new(Path::new(&lock_dir), &target);
    let _guard = lock.acquire(false, Duration::from_secs(30)).unwrap();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&target)
        .unwrap();
    // Byte-at-a-time writes with pauses would interleave without the lock.
    for _ in 0..5 {
        write!(file, "{id}").unwrap();
        file.flush().unwrap();
        thread::sleep(Duration::from_millis(20));
    }
    writeln!(file).unwrap();
}

#[test]
fn child_failfast_attempt() {
    let Ok(lock_dir) = std::env::var(ENV_LOCK_DIR) else {
        return;
    };
    let expect = std::env::var(ENV_EXPECT).unwrap();
    let lock = RepositoryLock::new(Path::new(&lock_dir), "lab/scans");
    let result = lock.acquire(true, Duration::from_secs(1));
    match expect.as_str() {
        "locked" => assert!(result.err().unwrap().is_locked()),
        "free" => assert!(result.is_ok()),
        other => panic!("unknown expectation {other}"),
    }
}

#[test]
fn writers_run_in_acquisition_order() {
    let dir = tempfile::tempdir().unwrap();
    let lock_dir = dir.path().join("locks");
    let target = dir.path().join("shared.txt");

    let children: Vec<Child> = [(1, 1000), (2, 0), (3, 500)]
        .into_iter()
        .map(|(id, delay)| spawn_child("child_writer", &writer_envs(&lock_dir, &target, id, delay)))
        .collect();
    for mut child in children {
        assert!(child.wait().unwrap().success());
    }

    let content = std::fs::read_to_string(&target).unwrap();
    assert_eq!(content, "22222\n33333\n11111\n");
}

#[test]
fn failfast_sees_lock_held_by_other_process() {
    let dir = tempfile::tempdir().unwrap();
    let lock = RepositoryLock::new(dir.path(), "lab/scans");
    let envs = |expect: &str| {
        vec![
            (ENV_LOCK_DIR, dir.path().display().to_string()),
            (ENV_EXPECT, expect.to_string()),
        ]
    };

    let guard = lock.acquire(false, Duration::from_secs(1)).unwrap();
    let status = spawn_child("child_failfast_attempt", &envs("locked")).wait().unwrap();
    assert!(status.success());

    drop(guard);
    let status = spawn_child("child_failfast_attempt", &envs("free")).wait().unwrap();
    assert!(status.success());
}
