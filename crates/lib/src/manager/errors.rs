//! Error types for record managers.

use thiserror::Error;

use crate::sync::GitErrorCode;

/// Errors raised by a [`Manager`](super::Manager).
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Committing failed inside the version-control layer.
    #[error("Commit failed ({code}): {message}")]
    Commit {
        /// Classified cause reported by the sync layer
        code: GitErrorCode,
        /// Message reported by the sync layer
        message: String,
    },

    /// The object lacks a usable identifier field.
    #[error("Object has no usable `{field}` field")]
    MissingId {
        /// Name of the identifier field
        field: String,
    },

    /// The identifier cannot name a single entry inside the manager's
    /// directory: empty, `.`, `..`, or containing a path separator.
    #[error("Invalid object ID {id:?}")]
    InvalidId {
        /// The rejected identifier
        id: String,
    },

    /// An update tried to change the object's identifier.
    #[error("Changing object IDs is not supported: {expected} -> {found}")]
    IdMismatch {
        /// Identifier the update was addressed to
        expected: String,
        /// Identifier found in the new data
        found: String,
    },

    /// Paths handed to a manager must be working-copy relative.
    #[error("Expected a relative path, got {path}")]
    AbsolutePath {
        /// The offending path
        path: String,
    },

    /// The object does not serialize to a JSON object.
    #[error("Object is not representable as a record: {reason}")]
    InvalidObject {
        /// What the object serialized to instead
        reason: String,
    },
}

impl ManagerError {
    /// Check if this error came from the version-control layer during commit.
    pub fn is_commit_error(&self) -> bool {
        matches!(self, ManagerError::Commit { .. })
    }

    /// The sync-layer code of a commit error.
    pub fn commit_code(&self) -> Option<GitErrorCode> {
        match self {
            ManagerError::Commit { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Check if this error is about an object's identity.
    pub fn is_id_error(&self) -> bool {
        matches!(
            self,
            ManagerError::MissingId { .. }
                | ManagerError::InvalidId { .. }
                | ManagerError::IdMismatch { .. }
        )
    }
}

// Conversion from ManagerError to the main Error type
impl From<ManagerError> for crate::Error {
    fn from(err: ManagerError) -> Self {
        crate::Error::Manager(err)
    }
}
