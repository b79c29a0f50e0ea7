//! The version-control capability consumed by the manifest.

use crate::status::StatusResult;

/// Error reported by a [`VersionControl`] implementation.
#[derive(Debug, thiserror::Error)]
#[error("version control error: {0}")]
pub struct VcsError(pub String);

/// Access to the repository's revision history and working-tree diff.
///
/// Calls are synchronous and their answers authoritative.
pub trait VersionControl: Send + Sync {
    /// Returns the id of the revision currently checked out.
    fn current_revision_id(&self) -> Result<String, VcsError>;

    /// Returns the working-tree changes relative to the current revision.
    fn diff_status(&self) -> Result<StatusResult, VcsError>;
}
