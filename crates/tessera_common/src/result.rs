//! The error shared by every tessera crate for broken invariants.

/// An internal error indicating a bug in tessera, not a user input problem.
///
/// For example a hash job that returns fewer digests than files it was
/// given. Runtime conditions such as a missing file or a contended lock have
/// their own error enums in the crate that raises them.
#[derive(Debug, thiserror::Error)]
#[error("internal error: {message}")]
pub struct InternalError {
    /// Description of the internal error.
    pub message: String,
}

impl InternalError {
    /// Creates a new internal error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
