//! Working-tree change sets and fast-hash change detection.
//!
//! Paths are relative to the files root, use `/` separators, and directory
//! paths end in `/`.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, ErrorKind};
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::CacheError;

/// Paths created, modified, and deleted since the manifest was last updated.
///
/// Applied to the manifest as one unit: either every path is committed or
/// none is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusResult {
    /// Paths not present in the manifest.
    pub created: Vec<String>,
    /// Paths whose fast hash differs from the manifest.
    pub modified: Vec<String>,
    /// Paths in the manifest that are no longer on disk.
    pub deleted: Vec<String>,
}

impl StatusResult {
    /// Returns `true` if there are no changes.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Returns the number of paths that need hashing (created + modified).
    pub fn dirty_count(&self) -> usize {
        self.created.len() + self.modified.len()
    }
}

/// Returns `true` for directory paths (trailing `/`).
pub fn is_dir_path(path: &str) -> bool {
    path.ends_with('/')
}

/// Returns every ancestor directory of `path`, outermost first.
///
/// `"a/b/c.txt"` yields `["a/", "a/b/"]`; `"a/b/"` yields `["a/"]`. The root
/// itself is never returned.
pub fn ancestor_dirs(path: &str) -> Vec<String> {
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    let mut dirs = Vec::new();
    let mut end = 0;
    while let Some(pos) = trimmed[end..].find('/') {
        end += pos + 1;
        dirs.push(trimmed[..end].to_string());
    }
    dirs
}

/// Lists every file and directory under `root` as manifest-relative paths.
///
/// Entries that vanish during the scan are skipped, as is a missing root.
/// Any other unreadable entry fails the scan; a partial listing would report
/// the unread subtree as deleted.
pub fn walk_files_root(root: &Path) -> Result<Vec<String>, CacheError> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.io_error().is_some_and(|e| e.kind() == ErrorKind::NotFound) => {
                debug!(%err, "entry vanished while scanning files root");
                continue;
            }
            Err(err) => {
                let path = err.path().unwrap_or(root).to_path_buf();
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("unreadable entry"));
                return Err(CacheError::Io { path, source });
            }
        };
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let mut rel = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if entry.file_type().is_dir() {
            rel.push('/');
        }
        paths.push(rel);
    }
    Ok(paths)
}

/// Compares current fast hashes against the manifest's recorded ones.
///
/// `current` maps every path on disk to its fast hash; `recorded` maps every
/// manifest path to the fast hash stored at its last update. Directories are
/// created or deleted, never modified.
pub fn detect_changes(
    current: &BTreeMap<String, Option<String>>,
    recorded: &BTreeMap<String, Option<String>>,
) -> StatusResult {
    let mut created = Vec::new();
    let mut modified = Vec::new();

    for (path, fast_hash) in current {
        match recorded.get(path) {
            None => created.push(path.clone()),
            Some(_) if is_dir_path(path) => {}
            Some(old) if old != fast_hash => modified.push(path.clone()),
            Some(_) => {}
        }
    }

    let deleted = recorded
        .keys()
        .filter(|p| !current.contains_key(*p))
        .cloned()
        .collect();

    StatusResult {
        created,
        modified,
        deleted,
    }
}

/// Adds missing ancestor directories of created and modified paths to
/// `created`, deduplicating and dropping the root.
///
/// `known` reports whether a directory is already in the manifest.
pub fn with_intermediate_dirs(status: &StatusResult, known: impl Fn(&str) -> bool) -> StatusResult {
    let mut created: BTreeSet<String> = BTreeSet::new();
    let listed: BTreeSet<&str> = status
        .created
        .iter()
        .chain(&status.modified)
        .map(String::as_str)
        .collect();

    for path in &status.created {
        created.insert(path.clone());
    }
    for path in status.created.iter().chain(&status.modified) {
        for dir in ancestor_dirs(path) {
            if !listed.contains(dir.as_str()) && !known(&dir) {
                created.insert(dir);
            }
        }
    }
    created.retain(|p| p != "/" && !p.is_empty());

    let modified: BTreeSet<String> = status
        .modified
        .iter()
        .filter(|p| p.as_str() != "/" && !created.contains(*p))
        .cloned()
        .collect();
    let deleted: BTreeSet<String> = status
        .deleted
        .iter()
        .filter(|p| p.as_str() != "/")
        .cloned()
        .collect();

    StatusResult {
        created: created.into_iter().collect(),
        modified: modified.into_iter().collect(),
        deleted: deleted.into_iter().collect(),
    }
}

/// Rewrites a change set from an external diff into manifest form.
///
/// Leading `/` is stripped, directories gain a trailing `/`, and each list
/// is sorted and deduplicated. `is_dir` is asked about every path that does
/// not already end in `/`, without the slash.
pub fn normalize_paths(status: &StatusResult, is_dir: impl Fn(&str) -> bool) -> StatusResult {
    let normalize = |paths: &[String]| -> Vec<String> {
        let set: BTreeSet<String> = paths
            .iter()
            .filter_map(|p| {
                let bare = p.trim_start_matches('/').trim_end_matches('/');
                if bare.is_empty() {
                    None
                } else if p.ends_with('/') || is_dir(bare) {
                    Some(format!("{bare}/"))
                } else {
                    Some(bare.to_string())
                }
            })
            .collect();
        set.into_iter().collect()
    };
    StatusResult {
        created: normalize(&status.created),
        modified: normalize(&status.modified),
        deleted: normalize(&status.deleted),
    }
}
