//! The path-to-content table for one dataset.
//!
//! The table is stored as `manifest.json` in the cache root. Every mutation
//! runs under the repository lock, starts from the table on disk, applies its
//! changes to a copy, and commits by atomically replacing the file and then
//! the in-memory snapshot. Readers only ever see whole snapshots.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tessera_common::ContentHash;
use tessera_config::EngineConfig;
use tessera_lock::{LockGuard, RepositoryLock};
use tracing::{debug, info, warn};

use crate::activity::{ActivitySink, UpdateActivity};
use crate::backend::{cache_backend, CacheBackend};
use crate::error::CacheError;
use crate::pool::ObjectPool;
use crate::scheduler::{HashScheduler, HashedFile};
use crate::smart_hash::SmartHash;
use crate::status::{self, StatusResult};
use crate::vcs::VersionControl;

/// Name of the manifest file within the cache root.
const MANIFEST_FILE: &str = "manifest.json";

/// Bump on incompatible changes to the persisted table.
const FORMAT_VERSION: u32 = 1;

/// Persisted state of one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ManifestRecord {
    content_hash: Option<ContentHash>,
    fast_hash: Option<String>,
    size_bytes: u64,
    is_dir: bool,
    #[serde(default)]
    is_favorite: bool,
    modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestTable {
    format_version: u32,
    linked_revision: Option<String>,
    entries: BTreeMap<String, ManifestRecord>,
}

impl Default for ManifestTable {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            linked_revision: None,
            entries: BTreeMap::new(),
        }
    }
}

impl ManifestTable {
    /// Loads the table from `cache_root`. A missing file is an empty table.
    fn load(cache_root: &Path) -> Result<Self, CacheError> {
        let path = cache_root.join(MANIFEST_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(CacheError::Io { path, source: err }),
        };
        let table: Self = serde_json::from_str(&content).map_err(|e| CacheError::ManifestParse {
            reason: e.to_string(),
        })?;
        if table.format_version != FORMAT_VERSION {
            return Err(CacheError::ManifestParse {
                reason: format!("unsupported format version {}", table.format_version),
            });
        }
        Ok(table)
    }

    /// Writes the table to a temporary file and renames it over the manifest.
    fn save(&self, cache_root: &Path) -> Result<(), CacheError> {
        fs::create_dir_all(cache_root).map_err(CacheError::io(cache_root))?;
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        let tmp = cache_root.join(format!(".{MANIFEST_FILE}.{}", std::process::id()));
        let path = cache_root.join(MANIFEST_FILE);
        fs::write(&tmp, json).map_err(CacheError::io(&tmp))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            CacheError::Io { path, source: e }
        })
    }

    fn fast_hashes(&self) -> BTreeMap<String, Option<String>> {
        self.entries
            .iter()
            .map(|(path, record)| (path.clone(), record.fast_hash.clone()))
            .collect()
    }
}

/// Cache state of one path, as returned by [`Manifest::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    /// Path relative to the dataset root; directories end in `/`.
    pub relative_path: String,
    /// Content hash (for directories, the digest of the path).
    pub content_hash: Option<ContentHash>,
    /// Fast hash recorded at the last update.
    pub fast_hash: Option<String>,
    /// File size in bytes; zero for directories.
    pub size_bytes: u64,
    /// Whether the path is a directory.
    pub is_dir: bool,
    /// Whether the content is present in the local object pool.
    pub is_local: bool,
    /// User-set favorite flag.
    pub is_favorite: bool,
    /// When the path was last committed.
    pub modified_at: DateTime<Utc>,
}

/// The authoritative path-to-content table for one dataset.
pub struct Manifest {
    backend: Box<dyn CacheBackend>,
    vcs: Arc<dyn VersionControl>,
    lock: RepositoryLock,
    lock_timeout: Duration,
    block_size: usize,
    scheduler: Option<HashScheduler>,
    activity: Option<Arc<dyn ActivitySink>>,
    table: RwLock<Option<Arc<ManifestTable>>>,
}

impl Manifest {
    /// Opens the manifest of the dataset named in `config`, provisioning its
    /// cache root.
    ///
    /// Fails with [`CacheError::MissingContext`] if the dataset identity is
    /// incomplete. The table itself is loaded on first use.
    pub fn new(config: &EngineConfig, vcs: Arc<dyn VersionControl>) -> Result<Self, CacheError> {
        let backend = cache_backend(config);
        let root = backend.cache_root()?;
        backend.initialize()?;
        let lock = RepositoryLock::new(&config.lock_dir(), &root.to_string_lossy());
        Ok(Self {
            backend,
            vcs,
            lock,
            lock_timeout: config.locks.timeout(),
            block_size: config.hashing.block_size,
            scheduler: None,
            activity: None,
            table: RwLock::new(None),
        })
    }

    /// Hashes changed files through background jobs instead of in-process.
    pub fn with_scheduler(mut self, scheduler: HashScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Delivers an [`UpdateActivity`] to `sink` after every committed update.
    pub fn with_activity_sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.activity = Some(sink);
        self
    }

    /// Returns the cache root.
    pub fn cache_root(&self) -> Result<PathBuf, CacheError> {
        self.backend.cache_root()
    }

    /// Takes the repository lock for cache writes made outside the manifest,
    /// such as downloads into the object pool. Waits up to the configured
    /// lock timeout.
    pub fn lock_repository(&self) -> Result<LockGuard<'_>, CacheError> {
        Ok(self.lock.acquire(false, self.lock_timeout)?)
    }

    /// Returns the revision whose directory is currently materialized, if any.
    pub fn linked_revision(&self) -> Result<Option<String>, CacheError> {
        Ok(self.snapshot()?.linked_revision.clone())
    }

    /// Returns the directory holding the dataset's files: the linked revision
    /// directory, or the current revision's directory before the first link.
    pub fn files_root(&self) -> Result<PathBuf, CacheError> {
        let table = self.snapshot()?;
        self.files_root_of(&table)
    }

    fn files_root_of(&self, table: &ManifestTable) -> Result<PathBuf, CacheError> {
        let Some(revision) = &table.linked_revision else {
            return self.backend.current_revision_dir(self.vcs.as_ref());
        };
        let dir = self.backend.revision_dir(revision)?;
        if !dir.exists() {
            let retired = retired_dir(&self.backend.cache_root()?, revision);
            if retired.is_dir() {
                return Ok(retired);
            }
        }
        Ok(dir)
    }

    /// Moves the linked revision's directory back into place if a relink of
    /// the same revision stopped after retiring it.
    fn restore_retired(&self, root: &Path, table: &ManifestTable) -> Result<(), CacheError> {
        let Some(revision) = &table.linked_revision else {
            return Ok(());
        };
        let dir = self.backend.revision_dir(revision)?;
        let retired = retired_dir(root, revision);
        if !dir.exists() && retired.is_dir() {
            fs::rename(&retired, &dir).map_err(CacheError::io(&retired))?;
            warn!(%revision, "restored revision directory left by an interrupted link");
        }
        Ok(())
    }

    /// Returns the entry for `path`, loading the table on first use.
    pub fn get(&self, path: &str) -> Result<ManifestEntry, CacheError> {
        let table = self.snapshot()?;
        let record = table
            .entries
            .get(path)
            .ok_or_else(|| CacheError::UnknownPath {
                path: path.to_string(),
            })?;
        Ok(self.entry(path, record))
    }

    /// Returns every entry whose path starts with `prefix`, sorted by path.
    pub fn list(&self, prefix: &str) -> Result<Vec<ManifestEntry>, CacheError> {
        let table = self.snapshot()?;
        Ok(table
            .entries
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, record)| self.entry(path, record))
            .collect())
    }

    /// Drops the in-memory snapshot so the next read reloads it from disk.
    pub fn refresh(&self) {
        *self.table.write() = None;
    }

    /// Compares the files on disk against the table using fast hashes.
    ///
    /// The result is sorted and can be passed straight to [`Manifest::update`].
    pub fn status(&self) -> Result<StatusResult, CacheError> {
        let table = self.snapshot()?;
        let files_root = self.files_root_of(&table)?;
        let smart = SmartHash::new(&files_root, self.block_size);
        let paths = status::walk_files_root(&files_root)?;
        let fast = smart.fast_hashes(&paths);
        let current: BTreeMap<String, Option<String>> = paths.into_iter().zip(fast).collect();
        Ok(status::detect_changes(&current, &table.fast_hashes()))
    }

    /// Reads the version-control diff and puts it in the form
    /// [`Manifest::update`] expects.
    ///
    /// A path is taken to be a directory if it is one on disk or if the
    /// table records it as one, so deleted directories keep their `/`.
    pub fn vcs_status(&self) -> Result<StatusResult, CacheError> {
        let table = self.snapshot()?;
        let files_root = self.files_root_of(&table)?;
        let diff = self.vcs.diff_status()?;
        Ok(status::normalize_paths(&diff, |path| {
            files_root.join(path).is_dir() || table.entries.contains_key(&format!("{path}/"))
        }))
    }

    /// Applies the version-control diff through [`Manifest::update`].
    pub fn update_from_vcs(&self) -> Result<StatusResult, CacheError> {
        let changes = self.vcs_status()?;
        self.update(&changes)
    }

    /// Applies `changes` to the table as one commit and returns the changes
    /// actually applied.
    ///
    /// Missing ancestor directories of changed paths are added. Paths that
    /// vanish before they can be hashed are skipped. Deleting a directory
    /// deletes everything under it. If hashing fails or any step errors,
    /// nothing is committed.
    pub fn update(&self, changes: &StatusResult) -> Result<StatusResult, CacheError> {
        let _guard = self.lock.acquire(false, self.lock_timeout)?;
        let root = self.backend.cache_root()?;
        let current = ManifestTable::load(&root)?;
        self.restore_retired(&root, &current)?;
        let files_root = self.files_root_of(&current)?;
        let changes =
            status::with_intermediate_dirs(changes, |dir| current.entries.contains_key(dir));

        let dirty: Vec<String> = changes
            .created
            .iter()
            .chain(&changes.modified)
            .cloned()
            .collect();
        let hashed = self.hash(&files_root, &dirty)?;

        let smart = SmartHash::new(&files_root, self.block_size);
        let pool = ObjectPool::new(self.backend.objects_dir()?);
        let mut next = current.clone();
        let mut applied = StatusResult::default();
        let now = Utc::now();

        for file in hashed {
            let Some(hash) = file.content_hash else {
                warn!(path = %file.path, "path vanished before hashing; skipped");
                continue;
            };
            let is_dir = status::is_dir_path(&file.path);
            let size_bytes = if is_dir {
                0
            } else {
                let source = smart.resolve(&file.path);
                let size = match fs::metadata(&source) {
                    Ok(metadata) => metadata.len(),
                    Err(err) if err.kind() == ErrorKind::NotFound => {
                        warn!(path = %file.path, "path vanished before ingest; skipped");
                        continue;
                    }
                    Err(err) => return Err(CacheError::Io { path: source, source: err }),
                };
                match pool.ingest(&source, &hash) {
                    Ok(_) => {}
                    Err(CacheError::ContentMismatch { actual, .. }) => {
                        warn!(
                            path = %file.path,
                            %hash,
                            %actual,
                            "file changed after hashing; skipped"
                        );
                        continue;
                    }
                    Err(CacheError::Io { source: err, .. })
                        if err.kind() == ErrorKind::NotFound =>
                    {
                        warn!(path = %file.path, "path vanished before ingest; skipped");
                        continue;
                    }
                    Err(err) => return Err(err),
                }
                size
            };

            let previous = current.entries.get(&file.path);
            next.entries.insert(
                file.path.clone(),
                ManifestRecord {
                    content_hash: Some(hash),
                    fast_hash: file.fast_hash,
                    size_bytes,
                    is_dir,
                    is_favorite: previous.is_some_and(|r| r.is_favorite),
                    modified_at: now,
                },
            );
            if previous.is_some() {
                applied.modified.push(file.path);
            } else {
                applied.created.push(file.path);
            }
        }

        for path in &changes.deleted {
            let doomed: Vec<String> = if status::is_dir_path(path) {
                next.entries
                    .range(path.clone()..)
                    .take_while(|(p, _)| p.starts_with(path.as_str()))
                    .map(|(p, _)| p.clone())
                    .collect()
            } else {
                next.entries.get_key_value(path).map(|(p, _)| p.clone()).into_iter().collect()
            };
            for p in doomed {
                next.entries.remove(&p);
                applied.deleted.push(p);
            }
        }
        applied.created.sort();
        applied.modified.sort();
        applied.deleted.sort();

        self.commit(&root, next)?;
        info!(
            created = applied.created.len(),
            modified = applied.modified.len(),
            deleted = applied.deleted.len(),
            "manifest updated"
        );
        self.create_update_activity_record(&applied);
        Ok(applied)
    }

    /// Summarises `changes` and delivers the summary to the activity sink.
    ///
    /// Sink failures are logged and otherwise ignored; the update they
    /// describe has already committed.
    pub fn create_update_activity_record(&self, changes: &StatusResult) -> UpdateActivity {
        let activity = UpdateActivity::from_status(changes);
        if let Some(sink) = &self.activity {
            if let Err(err) = sink.record(&activity) {
                warn!(%err, "failed to record update activity");
            }
        }
        activity
    }

    /// Materializes the current revision's directory from the object pool and
    /// removes the previously linked one.
    ///
    /// The new directory is fully built under a staging name before it is
    /// renamed into place, and the previous directory is only removed after
    /// the table points at the new one. Returns the new revision directory.
    pub fn link_revision(&self) -> Result<PathBuf, CacheError> {
        let _guard = self.lock.acquire(false, self.lock_timeout)?;
        let root = self.backend.cache_root()?;
        let mut next = ManifestTable::load(&root)?;
        self.restore_retired(&root, &next)?;
        let revision = self.vcs.current_revision_id()?;
        let target = self.backend.revision_dir(&revision)?;
        let previous = next
            .linked_revision
            .as_deref()
            .filter(|prev| *prev != revision)
            .map(|prev| self.backend.revision_dir(prev))
            .transpose()?;

        let staging = root.join(format!(".staging-{revision}"));
        remove_dir_if_present(&staging)?;
        let pool = ObjectPool::new(self.backend.objects_dir()?);
        let build = self.populate(&pool, &next, &staging);
        if let Err(err) = build {
            let _ = fs::remove_dir_all(&staging);
            return Err(err);
        }

        let retired = retired_dir(&root, &revision);
        if target.exists() {
            remove_dir_if_present(&retired)?;
            fs::rename(&target, &retired).map_err(CacheError::io(&target))?;
        }
        fs::rename(&staging, &target).map_err(CacheError::io(&staging))?;

        // Linked files carry the pool's timestamps; refresh so an untouched
        // tree reports no changes.
        let smart = SmartHash::new(&target, self.block_size);
        for (path, record) in next.entries.iter_mut() {
            record.fast_hash = smart.fast_hash(path);
        }
        next.linked_revision = Some(revision.clone());
        self.commit(&root, next)?;

        remove_dir_if_present(&retired)?;
        if let Some(previous) = previous {
            remove_dir_if_present(&previous)?;
        }
        info!(%revision, dir = %target.display(), "revision linked");
        Ok(target)
    }

    /// Sets or clears the favorite flag of `path`.
    pub fn set_favorite(&self, path: &str, favorite: bool) -> Result<ManifestEntry, CacheError> {
        let _guard = self.lock.acquire(false, self.lock_timeout)?;
        let root = self.backend.cache_root()?;
        let mut next = ManifestTable::load(&root)?;
        let record = next
            .entries
            .get_mut(path)
            .ok_or_else(|| CacheError::UnknownPath {
                path: path.to_string(),
            })?;
        record.is_favorite = favorite;
        let entry = self.entry(path, record);
        self.commit(&root, next)?;
        Ok(entry)
    }

    /// Removes pool objects the table no longer references and no revision
    /// directory links to. Returns the removed hashes.
    pub fn sweep_objects(&self) -> Result<Vec<ContentHash>, CacheError> {
        let _guard = self.lock.acquire(false, self.lock_timeout)?;
        let root = self.backend.cache_root()?;
        let table = ManifestTable::load(&root)?;
        let referenced: HashSet<ContentHash> = table
            .entries
            .values()
            .filter(|r| !r.is_dir)
            .filter_map(|r| r.content_hash)
            .collect();
        let removed = ObjectPool::new(self.backend.objects_dir()?).sweep(&referenced)?;
        debug!(removed = removed.len(), "object pool swept");
        Ok(removed)
    }

    fn snapshot(&self) -> Result<Arc<ManifestTable>, CacheError> {
        if let Some(table) = self.table.read().as_ref() {
            return Ok(Arc::clone(table));
        }
        let mut slot = self.table.write();
        if let Some(table) = slot.as_ref() {
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(ManifestTable::load(&self.backend.cache_root()?)?);
        *slot = Some(Arc::clone(&table));
        Ok(table)
    }

    fn commit(&self, root: &Path, table: ManifestTable) -> Result<(), CacheError> {
        table.save(root)?;
        *self.table.write() = Some(Arc::new(table));
        Ok(())
    }

    fn hash(&self, files_root: &Path, paths: &[String]) -> Result<Vec<HashedFile>, CacheError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        match &self.scheduler {
            Some(scheduler) => {
                let outcome = scheduler.hash_files(files_root, paths)?;
                if !outcome.is_complete() {
                    return Err(CacheError::HashJobsFailed {
                        failed: outcome.failed_jobs,
                        total: outcome.total_jobs,
                    });
                }
                Ok(outcome.hashed)
            }
            None => {
                let smart = SmartHash::new(files_root, self.block_size);
                let fast = smart.fast_hashes(paths);
                let hashes = smart.compute_file_hashes(paths);
                Ok(paths
                    .iter()
                    .zip(hashes)
                    .zip(fast)
                    .map(|((path, content_hash), fast_hash)| HashedFile {
                        path: path.clone(),
                        content_hash,
                        fast_hash,
                    })
                    .collect())
            }
        }
    }

    fn populate(
        &self,
        pool: &ObjectPool,
        table: &ManifestTable,
        dir: &Path,
    ) -> Result<(), CacheError> {
        fs::create_dir_all(dir).map_err(CacheError::io(dir))?;
        for (path, record) in &table.entries {
            let dest = dir.join(path.trim_end_matches('/'));
            if record.is_dir {
                fs::create_dir_all(&dest).map_err(CacheError::io(&dest))?;
                continue;
            }
            let Some(hash) = &record.content_hash else {
                continue;
            };
            if !pool.contains(hash) {
                debug!(%path, %hash, "object not in local pool; left unlinked");
                continue;
            }
            pool.link_into(hash, &dest)?;
        }
        Ok(())
    }

    fn entry(&self, path: &str, record: &ManifestRecord) -> ManifestEntry {
        let is_local = record.is_dir
            || match (&record.content_hash, self.backend.objects_dir()) {
                (Some(hash), Ok(objects)) => ObjectPool::new(objects).contains(hash),
                _ => false,
            };
        ManifestEntry {
            relative_path: path.to_string(),
            content_hash: record.content_hash,
            fast_hash: record.fast_hash.clone(),
            size_bytes: record.size_bytes,
            is_dir: record.is_dir,
            is_local,
            is_favorite: record.is_favorite,
            modified_at: record.modified_at,
        }
    }
}

fn retired_dir(root: &Path, revision: &str) -> PathBuf {
    root.join(format!(".retired-{revision}"))
}

fn remove_dir_if_present(dir: &Path) -> Result<(), CacheError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(CacheError::Io {
            path: dir.to_path_buf(),
            source: err,
        }),
    }
}
