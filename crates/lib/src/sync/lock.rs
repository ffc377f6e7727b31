//! Staging lock serializing every mutation of a working copy.
//!
//! A binary lock with a timeout and a small bounded wait queue. Callers that
//! would exceed either bound fail instead of blocking indefinitely.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::trace;

use super::error::SyncError;
use crate::constants::{LOCK_MAX_PENDING, LOCK_TIMEOUT};

/// Guard held for the duration of a guarded operation; released on drop.
pub type StagingGuard<'a> = MutexGuard<'a, ()>;

#[derive(Debug)]
pub struct StagingLock {
    mutex: Mutex<()>,
    pending: AtomicUsize,
    max_pending: usize,
    timeout: Duration,
}

impl Default for StagingLock {
    fn default() -> Self {
        Self::new(LOCK_TIMEOUT, LOCK_MAX_PENDING)
    }
}

/// Decrements the wait counter on every exit path, including cancellation.
struct PendingSlot<'a>(&'a AtomicUsize);

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StagingLock {
    pub fn new(timeout: Duration, max_pending: usize) -> Self {
        Self {
            mutex: Mutex::new(()),
            pending: AtomicUsize::new(0),
            max_pending,
            timeout,
        }
    }

    /// Whether some operation currently holds the lock.
    pub fn is_busy(&self) -> bool {
        self.mutex.try_lock().is_err()
    }

    /// Number of callers currently waiting.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(&self) -> Option<StagingGuard<'_>> {
        self.mutex.try_lock().ok()
    }

    /// Acquire the lock, waiting at most the configured timeout.
    pub async fn acquire(&self) -> Result<StagingGuard<'_>, SyncError> {
        if let Ok(guard) = self.mutex.try_lock() {
            return Ok(guard);
        }

        let waiting = self.pending.fetch_add(1, Ordering::SeqCst);
        let _slot = PendingSlot(&self.pending);
        if waiting >= self.max_pending {
            trace!(waiting, "Staging lock queue is full");
            return Err(SyncError::LockQueueFull);
        }

        tokio::time::timeout(self.timeout, self.mutex.lock())
            .await
            .map_err(|_| SyncError::LockTimeout)
    }
}
