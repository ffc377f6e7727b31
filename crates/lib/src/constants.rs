//! Constants used throughout the gitstore library.
//!
//! This module provides central definitions for remote names, lock tuning and
//! the file names the working copy treats specially.

use std::time::Duration;

/// Name of the single remote every working copy synchronizes against.
pub const MAIN_REMOTE: &str = "origin";

/// Name of the VCS metadata directory inside the working copy.
pub const VCS_DIR: &str = ".git";

/// Interval between periodic synchronization cycles.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(50);

/// How long a caller waits for the staging lock before giving up.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(20);

/// Maximum number of callers allowed to wait on the staging lock at once.
pub const LOCK_MAX_PENDING: usize = 2;

/// Maximum number of commits walked when looking for unpushed local commits.
pub const LOCAL_COMMIT_WALK_DEPTH: usize = 100;

/// Operating system artifacts that never count as local changes.
pub const OS_ARTIFACTS: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

/// Companion file holding the metadata fields of a directory record.
pub const META_FILE: &str = "meta.yaml";

/// File holding the non-metadata fields of a directory record.
pub const BODY_FILE: &str = "body.yaml";
