//!
//! gitstore: structured records kept as files in a git working copy,
//! synchronized against a single remote.
//!
//! ## Core Concepts
//!
//! * **SyncEngine (`sync::SyncEngine`)**: Owns the working copy, its remote and credentials, and a live `Status`. Runs the synchronization cycle and provides staging, commit and discard primitives serialized by a staging lock.
//! * **Worker (`sync::Worker`)**: A dedicated thread performing the network-bound clone, pull and push requests.
//! * **StorageBackend (`backend::StorageBackend`)**: Record-level CRUD, listing and indexing over files in the working copy. Drives periodic synchronization and keeps the registry of managers used to find orphaned changes.
//! * **RecordFs (`backend::RecordFs`)**: The filesystem capability the backend reads and writes through; `backend::FileTree` stores records as YAML files.
//! * **Manager (`manager::Manager`)**: Maps one model type to records under its own subdirectory and commits them with default messages.
//!
//! Control flows Manager → StorageBackend → SyncEngine → Worker → remote.
//! Status flows back through a watch channel and an optional reporter, since
//! synchronization also runs on a timer with no caller waiting.

pub mod backend;
pub mod clock;
pub mod constants;
pub mod manager;
pub mod sync;

pub use backend::{BackendOptions, StorageBackend};
#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;
pub use clock::{Clock, SystemClock};
pub use manager::{CommitMode, Manager, ManagerOptions, ObjectId};
pub use sync::{RepoConfig, Status, SyncEngine, SyncOutcome};

/// Result type used throughout the gitstore library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the gitstore library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured synchronization errors from the sync module
    #[error(transparent)]
    Sync(sync::SyncError),

    /// Structured record storage errors from the backend module
    #[error(transparent)]
    Backend(backend::BackendError),

    /// Structured manager errors from the manager module
    #[error(transparent)]
    Manager(manager::ManagerError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
            Error::Sync(_) => "sync",
            Error::Backend(_) => "backend",
            Error::Manager(_) => "manager",
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Backend(backend_err) => backend_err.is_not_found(),
            Error::Sync(sync_err) => sync_err.git_code() == Some(sync::GitErrorCode::NotFound),
            _ => false,
        }
    }

    /// Check if this error indicates a conflict (already exists).
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Backend(backend_err) => backend_err.is_unique_constraint(),
            Error::Manager(manager_err) => manager_err.is_id_error(),
            _ => false,
        }
    }

    /// Check if this error is authentication-related.
    pub fn is_authentication_error(&self) -> bool {
        match self {
            Error::Sync(sync_err) => sync_err.is_authentication_error(),
            Error::Manager(manager_err) => {
                manager_err.commit_code() == Some(sync::GitErrorCode::AuthenticationRequired)
            }
            _ => false,
        }
    }

    /// Check if this error came from the version-control layer.
    pub fn is_sync_error(&self) -> bool {
        matches!(self, Error::Sync(_))
    }

    /// Check if this error is a structured commit failure.
    pub fn is_commit_error(&self) -> bool {
        match self {
            Error::Manager(manager_err) => manager_err.is_commit_error(),
            _ => false,
        }
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Backend(backend_err) => backend_err.is_io_error(),
            Error::Sync(sync::SyncError::Io { .. }) => true,
            _ => false,
        }
    }

    /// Check if this error indicates a timeout or a saturated lock queue.
    pub fn is_timeout_error(&self) -> bool {
        match self {
            Error::Sync(sync_err) => sync_err.is_lock_error(),
            _ => false,
        }
    }
}
