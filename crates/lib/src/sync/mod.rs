//! Versioned-storage synchronization core.
//!
//! The [`SyncEngine`] keeps a local working copy in step with a single remote
//! named `origin`. Local staging, committing and discarding are serialized by
//! a [`StagingLock`]; network-bound clone, pull and push run on a dedicated
//! [`Worker`] thread. Progress and failures are reflected in a live
//! [`Status`] rather than returned, because synchronization also runs on a
//! timer with no caller to report to.

mod auth;
mod config;
mod engine;
pub mod error;
mod lock;
mod status;
pub mod worker;
mod working_copy;

pub use auth::{AuthCredentials, Author};
pub use config::RepoConfig;
pub use engine::{SyncEngine, SyncOutcome};
pub use error::{GitErrorCode, SyncError};
pub use lock::{StagingGuard, StagingLock};
pub use status::{Status, StatusBroadcast, StatusRelativeToLocal, StatusReporter};
pub use worker::{RemoteSpec, Worker, WorkerAction, WorkerRequest, WorkerResponse};
