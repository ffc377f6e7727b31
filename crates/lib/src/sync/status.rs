//! Live synchronization status.
//!
//! [`Status`] is owned by the [`SyncEngine`](super::SyncEngine): it is the only
//! writer. Readers take snapshots through [`StatusBroadcast::current`] or
//! subscribe to a [`watch`] channel. Every mutation is also pushed, without
//! diffing, to an optional [`StatusReporter`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::warn;

/// Where the remote stands relative to the local working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusRelativeToLocal {
    /// No successful synchronization yet.
    #[default]
    Unknown,
    /// Local and remote are in sync.
    Updated,
    /// Histories diverged; needs manual resolution.
    Diverged,
    /// Local has commits the remote does not have yet.
    Behind,
}

/// Snapshot of the synchronization state of one working copy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    pub is_online: bool,
    pub is_misconfigured: bool,
    pub has_local_changes: bool,
    pub needs_password: bool,
    pub status_relative_to_local: StatusRelativeToLocal,
    pub last_synchronized: Option<DateTime<Utc>>,
    pub is_pushing: bool,
    pub is_pulling: bool,
}

impl Status {
    /// Status at the start of a sync cycle: everything reset except the last
    /// synchronization time, optimistically online and pulling.
    pub(crate) fn cycle_start(previous: &Status) -> Self {
        Status {
            is_online: true,
            is_pulling: true,
            last_synchronized: previous.last_synchronized,
            ..Status::default()
        }
    }
}

/// Receives every status mutation.
///
/// Failures are logged and otherwise ignored; they never interrupt sync.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, status: &Status) -> crate::Result<()>;
}

/// Single-writer status cell with change notification.
pub struct StatusBroadcast {
    sender: watch::Sender<Status>,
    reporter: Option<Arc<dyn StatusReporter>>,
}

impl StatusBroadcast {
    pub fn new(reporter: Option<Arc<dyn StatusReporter>>) -> Self {
        let (sender, _) = watch::channel(Status::default());
        Self { sender, reporter }
    }

    /// Current status snapshot.
    pub fn current(&self) -> Status {
        self.sender.borrow().clone()
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.sender.subscribe()
    }

    /// Mutate the status in place and broadcast the result.
    pub async fn update(&self, mutate: impl FnOnce(&mut Status)) {
        self.sender.send_modify(mutate);
        self.report().await;
    }

    /// Replace the status wholesale and broadcast it.
    pub async fn replace(&self, status: Status) {
        self.sender.send_replace(status);
        self.report().await;
    }

    async fn report(&self) {
        if let Some(reporter) = &self.reporter {
            let snapshot = self.current();
            if let Err(e) = reporter.report(&snapshot).await {
                warn!("Status reporter failed: {e}");
            }
        }
    }
}

impl std::fmt::Debug for StatusBroadcast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusBroadcast")
            .field("current", &*self.sender.borrow())
            .field("has_reporter", &self.reporter.is_some())
            .finish()
    }
}
