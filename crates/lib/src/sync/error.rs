//! Error types for the synchronization module.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failure reported by the version-control layer.
///
/// Status transitions are driven by this code alone, never by message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum GitErrorCode {
    /// Fast-forward impossible; local and remote history diverged.
    NotFastForward,
    /// A real merge would be required, which is never attempted.
    MergeNotSupported,
    /// Author name or email is not configured.
    MissingIdentity,
    /// Remote host could not be reached.
    HostUnreachable,
    /// Credential missing or rejected.
    AuthenticationRequired,
    /// Referenced object, path or repository does not exist.
    NotFound,
    /// Anything else.
    Other,
}

impl GitErrorCode {
    /// Stable identifier used in commit errors and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            GitErrorCode::NotFastForward => "NotFastForward",
            GitErrorCode::MergeNotSupported => "MergeNotSupported",
            GitErrorCode::MissingIdentity => "MissingIdentity",
            GitErrorCode::HostUnreachable => "HostUnreachable",
            GitErrorCode::AuthenticationRequired => "AuthenticationRequired",
            GitErrorCode::NotFound => "NotFound",
            GitErrorCode::Other => "Other",
        }
    }

    /// Classify a libgit2 error.
    pub fn classify(err: &git2::Error) -> Self {
        use git2::{ErrorClass, ErrorCode};

        match (err.code(), err.class()) {
            (ErrorCode::Auth, _) => GitErrorCode::AuthenticationRequired,
            (ErrorCode::NotFastForward, _) => GitErrorCode::NotFastForward,
            (ErrorCode::MergeConflict | ErrorCode::Conflict, _) => GitErrorCode::MergeNotSupported,
            (_, ErrorClass::Http) if err.message().contains("401") => {
                GitErrorCode::AuthenticationRequired
            }
            (_, ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssl | ErrorClass::Ssh) => {
                GitErrorCode::HostUnreachable
            }
            (ErrorCode::NotFound, _) => GitErrorCode::NotFound,
            _ => GitErrorCode::Other,
        }
    }
}

impl fmt::Display for GitErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during synchronization operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// Version-control operation failed.
    #[error("{code}: {message}")]
    Git { code: GitErrorCode, message: String },

    /// Cloning the remote failed; the working directory has been wiped.
    #[error("Failed to initialize working copy from {repo_url}: {message}")]
    InitializationFailed {
        repo_url: String,
        code: GitErrorCode,
        message: String,
    },

    /// Waited too long for the staging lock.
    #[error("Timed out waiting for the staging lock")]
    LockTimeout,

    /// Too many callers were already waiting for the staging lock.
    #[error("Too many pending operations on the staging lock")]
    LockQueueFull,

    /// A staging operation was given no paths.
    #[error("No paths given to commit")]
    NoPathsGiven,

    /// The network worker could not be reached or dropped its response.
    #[error("Network worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// HEAD does not point at a local branch.
    #[error("Working copy has no local branch checked out")]
    NoLocalBranch,

    /// Filesystem error inside the working copy.
    #[error("Working copy I/O error")]
    Io {
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    /// Build a `Git` error from a code and message.
    pub fn git(code: GitErrorCode, message: impl Into<String>) -> Self {
        SyncError::Git {
            code,
            message: message.into(),
        }
    }

    /// The version-control error code, if this error came from the VCS layer.
    pub fn git_code(&self) -> Option<GitErrorCode> {
        match self {
            SyncError::Git { code, .. } | SyncError::InitializationFailed { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }

    /// Check if this is a lock acquisition failure.
    pub fn is_lock_error(&self) -> bool {
        matches!(self, SyncError::LockTimeout | SyncError::LockQueueFull)
    }

    /// Check if local and remote history diverged.
    pub fn is_diverged(&self) -> bool {
        matches!(
            self.git_code(),
            Some(GitErrorCode::NotFastForward | GitErrorCode::MergeNotSupported)
        )
    }

    /// Check if this is a network/connection error.
    pub fn is_network_error(&self) -> bool {
        self.git_code() == Some(GitErrorCode::HostUnreachable)
    }

    /// Check if a credential is missing or was rejected.
    pub fn is_authentication_error(&self) -> bool {
        self.git_code() == Some(GitErrorCode::AuthenticationRequired)
    }

    /// Check if the author identity is misconfigured.
    pub fn is_misconfigured(&self) -> bool {
        self.git_code() == Some(GitErrorCode::MissingIdentity)
    }

    /// Check if this error happened while initializing the working copy.
    pub fn is_initialization_error(&self) -> bool {
        matches!(self, SyncError::InitializationFailed { .. })
    }
}

impl From<git2::Error> for SyncError {
    fn from(err: git2::Error) -> Self {
        SyncError::Git {
            code: GitErrorCode::classify(&err),
            message: err.message().to_string(),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(source: std::io::Error) -> Self {
        SyncError::Io { source }
    }
}

// Conversion from SyncError to the main Error type
impl From<SyncError> for crate::Error {
    fn from(err: SyncError) -> Self {
        crate::Error::Sync(err)
    }
}
