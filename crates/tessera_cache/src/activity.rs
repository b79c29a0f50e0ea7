//! Activity records emitted after a manifest update commits.

use crate::status::StatusResult;

/// Error reported by an [`ActivitySink`].
#[derive(Debug, thiserror::Error)]
#[error("failed to record activity: {0}")]
pub struct ActivityError(pub String);

/// Summary of one committed manifest update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateActivity {
    /// Number of created paths.
    pub created: usize,
    /// Number of modified paths.
    pub modified: usize,
    /// Number of deleted paths.
    pub deleted: usize,
    /// Human-readable summary, e.g. `"Added 2 files. Deleted 1 file."`.
    pub message: String,
}

impl UpdateActivity {
    /// Summarises a committed change set.
    pub fn from_status(status: &StatusResult) -> Self {
        let created = status.created.len();
        let modified = status.modified.len();
        let deleted = status.deleted.len();

        let parts: Vec<String> = [("Added", created), ("Modified", modified), ("Deleted", deleted)]
            .into_iter()
            .filter(|(_, n)| *n > 0)
            .map(|(verb, n)| format!("{verb} {n} {}.", if n == 1 { "file" } else { "files" }))
            .collect();
        let message = if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join(" ")
        };

        Self {
            created,
            modified,
            deleted,
            message,
        }
    }
}

/// Receives activity records. Failures are logged by the caller and never
/// undo the update they describe.
pub trait ActivitySink: Send + Sync {
    /// Records one update.
    fn record(&self, activity: &UpdateActivity) -> Result<(), ActivityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(c: usize, m: usize, d: usize) -> StatusResult {
        let names = |prefix: &str, n: usize| (0..n).map(|i| format!("{prefix}{i}")).collect();
        StatusResult {
            created: names("c", c),
            modified: names("m", m),
            deleted: names("d", d),
        }
    }

    #[test]
    fn message_with_all_kinds() {
        let activity = UpdateActivity::from_status(&status(2, 1, 1));
        assert_eq!(activity.message, "Added 2 files. Modified 1 file. Deleted 1 file.");
        assert_eq!((activity.created, activity.modified, activity.deleted), (2, 1, 1));
    }

    #[test]
    fn message_skips_zero_counts() {
        let activity = UpdateActivity::from_status(&status(0, 3, 0));
        assert_eq!(activity.message, "Modified 3 files.");
    }

    #[test]
    fn message_for_empty_status() {
        assert_eq!(UpdateActivity::from_status(&StatusResult::default()).message, "No changes");
    }

    #[test]
    fn error_display() {
        let err = ActivityError("store offline".to_string());
        assert_eq!(err.to_string(), "failed to record activity: store offline");
    }
}
