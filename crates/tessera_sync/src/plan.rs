//! Selects the objects a push or pull has to move.

use std::collections::HashSet;

use tessera_cache::{Manifest, ManifestEntry, OBJECTS_DIR};
use tracing::debug;

use crate::backend::StorageBackend;
use crate::error::SyncError;
use crate::object::{PullObject, PushObject, TransferObject};

/// Returns one object per distinct hash among entries matching `filter`.
fn candidates<T: TransferObject>(
    manifest: &Manifest,
    prefix: &str,
    revision: &str,
    mut filter: impl FnMut(&ManifestEntry) -> Result<bool, SyncError>,
) -> Result<Vec<T>, SyncError> {
    let objects_dir = manifest.cache_root()?.join(OBJECTS_DIR);
    let mut seen = HashSet::new();
    let mut objects = Vec::new();
    for entry in manifest.list(prefix)? {
        if entry.is_dir {
            continue;
        }
        let Some(hash) = entry.content_hash else {
            continue;
        };
        if seen.contains(&hash) || !filter(&entry)? {
            continue;
        }
        seen.insert(hash);
        objects.push(T::from_parts(
            objects_dir.join(hash.to_string()).to_string_lossy().into_owned(),
            entry.relative_path,
            revision.to_string(),
        ));
    }
    debug!(kind = T::KIND, %prefix, count = objects.len(), "transfer candidates selected");
    Ok(objects)
}

/// Local objects under `prefix` that `backend` does not have yet.
///
/// Files sharing content are uploaded once, under the first path in sorted
/// order.
pub fn push_candidates(
    manifest: &Manifest,
    backend: &dyn StorageBackend,
    prefix: &str,
    revision: &str,
) -> Result<Vec<PushObject>, SyncError> {
    candidates(manifest, prefix, revision, |entry| {
        let Some(hash) = &entry.content_hash else {
            return Ok(false);
        };
        Ok(entry.is_local && !backend.contains(hash)?)
    })
}

/// Objects under `prefix` that the manifest records but the local pool lacks.
pub fn pull_candidates(
    manifest: &Manifest,
    prefix: &str,
    revision: &str,
) -> Result<Vec<PullObject>, SyncError> {
    candidates(manifest, prefix, revision, |entry| Ok(!entry.is_local))
}
