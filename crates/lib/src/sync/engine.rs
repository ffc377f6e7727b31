//! The synchronization engine.
//!
//! [`SyncEngine`] owns one working copy: its path, the remote it tracks, the
//! credentials used to reach it and the live [`Status`]. Local versioning
//! primitives run inline under the [`StagingLock`]; clone, pull and push are
//! delegated to the network [`Worker`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::auth::{AuthCredentials, Author};
use super::config::RepoConfig;
use super::error::{GitErrorCode, SyncError};
use super::lock::StagingLock;
use super::status::{Status, StatusBroadcast, StatusRelativeToLocal, StatusReporter};
use super::worker::{RemoteSpec, Worker, WorkerRequest};
use super::working_copy;
use crate::clock::{Clock, SystemClock};
use crate::constants::{MAIN_REMOTE, VCS_DIR};

/// Result of one synchronization cycle.
///
/// `possibly_mutated_data` tells callers whether cached reads should be
/// refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub completed: bool,
    pub possibly_mutated_data: bool,
}

impl SyncOutcome {
    const SKIPPED: SyncOutcome = SyncOutcome {
        completed: false,
        possibly_mutated_data: false,
    };
}

pub struct SyncEngine {
    work_dir: PathBuf,
    repo_url: String,
    author: Author,
    auth: Mutex<AuthCredentials>,
    push_pending: AtomicBool,
    lock: StagingLock,
    status: StatusBroadcast,
    worker: Worker,
    clock: Arc<dyn Clock>,
}

impl SyncEngine {
    pub fn new(config: RepoConfig) -> Self {
        Self {
            author: config.author(),
            auth: Mutex::new(AuthCredentials::new(config.username)),
            work_dir: config.work_dir,
            repo_url: config.repo_url,
            push_pending: AtomicBool::new(false),
            lock: StagingLock::default(),
            status: StatusBroadcast::new(None),
            worker: Worker::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Receive every status mutation.
    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.status = StatusBroadcast::new(Some(reporter));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the default staging lock, e.g. to shorten its timeout.
    pub fn with_lock(mut self, lock: StagingLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn repo_url(&self) -> &str {
        &self.repo_url
    }

    pub fn author(&self) -> &Author {
        &self.author
    }

    pub fn username(&self) -> String {
        self.credentials().username.clone()
    }

    pub fn needs_password(&self) -> bool {
        self.credentials().needs_password()
    }

    /// Current status snapshot.
    pub fn status(&self) -> Status {
        self.status.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    pub fn lock(&self) -> &StagingLock {
        &self.lock
    }

    fn credentials(&self) -> MutexGuard<'_, AuthCredentials> {
        self.auth.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remote_spec(&self) -> RemoteSpec {
        RemoteSpec {
            work_dir: self.work_dir.clone(),
            repo_url: self.repo_url.clone(),
            auth: self.credentials().clone(),
        }
    }

    // Initialization

    /// Whether the working directory holds a usable checkout.
    pub fn is_initialized(&self) -> bool {
        self.work_dir.join(VCS_DIR).exists() && working_copy::open(&self.work_dir).is_ok()
    }

    /// URL of the `origin` remote of the existing checkout.
    pub fn origin_url(&self) -> Result<Option<String>, SyncError> {
        let repo = working_copy::open(&self.work_dir)?;
        let remote = repo.find_remote(MAIN_REMOTE)?;
        Ok(remote.url().map(str::to_string))
    }

    pub fn is_using_remote_url(&self, url: &str) -> Result<bool, SyncError> {
        Ok(self.origin_url()?.as_deref() == Some(url))
    }

    /// Make sure a valid working copy of the configured remote exists.
    ///
    /// The copy is wiped and cloned afresh when `force_reset` is set, when it
    /// tracks a different remote or when it cannot be opened. Returns whether
    /// that happened.
    pub async fn init(&self, force_reset: bool) -> Result<bool, SyncError> {
        let reinitialize = if force_reset {
            info!("Forced reset of the working copy requested");
            true
        } else {
            match self.is_using_remote_url(&self.repo_url) {
                Ok(true) => false,
                Ok(false) => {
                    warn!("Working copy tracks a different remote");
                    true
                }
                Err(e) => {
                    debug!("Working copy probe failed: {e}");
                    true
                }
            }
        };

        if reinitialize {
            self.destroy().await?;
            self.force_initialize().await?;
        }
        Ok(reinitialize)
    }

    /// Clone the remote into the working directory.
    ///
    /// On failure the directory is wiped again and
    /// [`SyncError::InitializationFailed`] is returned.
    pub async fn force_initialize(&self) -> Result<(), SyncError> {
        let _guard = self.lock.acquire().await?;
        self.clone_unlocked()
            .instrument(info_span!("initialize", repo_url = %self.repo_url))
            .await
    }

    async fn clone_unlocked(&self) -> Result<(), SyncError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;

        match self.worker.call(WorkerRequest::Clone(self.remote_spec())).await {
            Ok(_) => {
                info!("Working copy initialized");
                Ok(())
            }
            Err(err) => {
                error!("Clone failed: {err}");
                if let Err(e) = remove_dir_if_exists(&self.work_dir).await {
                    warn!("Failed to clean up after failed clone: {e}");
                }
                self.handle_git_error(&err).await;
                Err(SyncError::InitializationFailed {
                    repo_url: self.repo_url.clone(),
                    code: err.git_code().unwrap_or(GitErrorCode::Other),
                    message: err.to_string(),
                })
            }
        }
    }

    /// Remove the working directory; the next sync clones afresh.
    pub async fn destroy(&self) -> Result<(), SyncError> {
        let _guard = self.lock.acquire().await?;
        info!(work_dir = %self.work_dir.display(), "Removing working copy");
        remove_dir_if_exists(&self.work_dir).await
    }

    /// Stop the network worker. A later network request starts a new one.
    pub fn terminate(&self) {
        self.worker.terminate();
    }

    // Local versioning primitives

    /// Changed paths under any of `path_specs`, excluding VCS internals and
    /// OS artifacts. `"."` selects everything.
    pub fn list_changed_files<S: AsRef<str>>(
        &self,
        path_specs: &[S],
    ) -> Result<Vec<String>, SyncError> {
        let repo = working_copy::open(&self.work_dir)?;
        let changed = working_copy::changed_paths(&repo, false)?;
        Ok(working_copy::filter_by_specs(changed, path_specs))
    }

    /// Commit exactly the changes under `paths`.
    ///
    /// Everything staged before is unstaged first, so stray content from an
    /// earlier failed attempt never ends up in the commit. Returns the number
    /// of changed files committed; zero means nothing happened.
    pub async fn stage_and_commit<S: AsRef<str>>(
        &self,
        paths: &[S],
        message: &str,
        removing: bool,
    ) -> Result<usize, SyncError> {
        if paths.is_empty() {
            return Err(SyncError::NoPathsGiven);
        }
        let paths: Vec<&str> = paths.iter().map(AsRef::as_ref).collect();

        let _guard = self.lock.acquire().await?;
        let result = self.author.signature().and_then(|signature| {
            let repo = working_copy::open(&self.work_dir)?;
            working_copy::stage_and_commit(&repo, &paths, message, removing, &signature)
        });

        match result {
            Ok(count) => {
                if count > 0 {
                    info!(count, %message, "Committed changes");
                }
                Ok(count)
            }
            Err(err) => {
                self.handle_git_error(&err).await;
                Err(err)
            }
        }
    }

    /// Discard working-tree changes under `paths`, or every change when
    /// `None`. Returns the paths that were reset.
    pub async fn reset_files<S: AsRef<str>>(
        &self,
        paths: Option<&[S]>,
    ) -> Result<Vec<String>, SyncError> {
        let _guard = self.lock.acquire().await?;
        let repo = working_copy::open(&self.work_dir)?;
        let changed = working_copy::changed_paths(&repo, true)?;
        let targets = match paths {
            Some(specs) => working_copy::filter_by_specs(changed, specs),
            None => changed,
        };
        working_copy::reset_paths(&repo, &self.work_dir, &targets)?;
        if !targets.is_empty() {
            info!(count = targets.len(), "Discarded changes");
        }
        Ok(targets)
    }

    /// Reset every changed path `is_owned` does not claim.
    ///
    /// Must run before any externally triggered commit.
    pub async fn reset_orphaned_file_changes(
        &self,
        is_owned: impl Fn(&str) -> bool + Send,
    ) -> Result<Vec<String>, SyncError> {
        let _guard = self.lock.acquire().await?;
        let repo = working_copy::open(&self.work_dir)?;
        let orphaned: Vec<String> = working_copy::changed_paths(&repo, true)?
            .into_iter()
            .filter(|path| !is_owned(path.as_str()))
            .collect();
        if !orphaned.is_empty() {
            warn!(?orphaned, "Resetting changes not owned by any manager");
            working_copy::reset_paths(&repo, &self.work_dir, &orphaned)?;
        }
        Ok(orphaned)
    }

    /// Recompute `has_local_changes`.
    pub async fn check_uncommitted(&self) -> Result<bool, SyncError> {
        let has_local_changes = !self.list_changed_files(&["."])?.is_empty();
        self.status
            .update(|s| s.has_local_changes = has_local_changes)
            .await;
        Ok(has_local_changes)
    }

    /// Summaries of local commits the remote does not have yet, newest first.
    pub fn list_local_commits(&self) -> Result<Vec<String>, SyncError> {
        let repo = working_copy::open(&self.work_dir)?;
        working_copy::local_commits(&repo)
    }

    /// Raw file contents as of `revision` (a commit id or any revspec).
    pub fn read_file_at_commit(&self, path: &str, revision: &str) -> Result<Vec<u8>, SyncError> {
        let repo = working_copy::open(&self.work_dir)?;
        working_copy::file_at_revision(&repo, path, revision)
    }

    pub fn config_get(&self, key: &str) -> Result<Option<String>, SyncError> {
        let config = working_copy::open(&self.work_dir)?.config()?;
        match config.get_string(key) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn config_set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        let mut config = working_copy::open(&self.work_dir)?.config()?;
        config.set_str(key, value)?;
        Ok(())
    }

    // Remote state

    /// Mark that local commits should reach the remote after the next
    /// successful pull.
    pub async fn request_push(&self) {
        self.push_pending.store(true, Ordering::SeqCst);
        self.status
            .update(|s| s.status_relative_to_local = StatusRelativeToLocal::Behind)
            .await;
    }

    pub fn is_push_pending(&self) -> bool {
        self.push_pending.load(Ordering::SeqCst)
    }

    /// Update the in-memory password. `None` or blank clears it.
    pub async fn set_password(&self, value: Option<String>) {
        let needs_password = {
            let mut auth = self.credentials();
            auth.set_password(value);
            auth.needs_password()
        };
        if needs_password {
            info!("Password cleared");
        } else {
            info!("Password set");
        }
        self.status
            .update(|s| s.needs_password = needs_password)
            .await;
    }

    /// Translate a sync failure into status changes.
    async fn handle_git_error(&self, err: &SyncError) {
        match err.git_code() {
            Some(GitErrorCode::NotFastForward | GitErrorCode::MergeNotSupported) => {
                error!("Local and remote history diverged: {err}");
                self.status
                    .update(|s| s.status_relative_to_local = StatusRelativeToLocal::Diverged)
                    .await;
            }
            Some(GitErrorCode::MissingIdentity) => {
                warn!("Author identity is not configured");
                self.status.update(|s| s.is_misconfigured = true).await;
            }
            Some(GitErrorCode::HostUnreachable) => {
                warn!("Remote is unreachable, will retry: {err}");
                self.status.update(|s| s.is_online = false).await;
            }
            Some(GitErrorCode::AuthenticationRequired) => {
                warn!("Authentication failed, clearing password");
                self.set_password(None).await;
            }
            _ => error!("Synchronization error: {err}"),
        }
    }

    // Synchronization

    /// Run one synchronization cycle.
    ///
    /// Ordinary sync failures are classified into [`Status`] and reported as
    /// an incomplete [`SyncOutcome`]. Only a failed initialization and
    /// unexpected local errors are returned as `Err`.
    pub async fn synchronize(&self) -> Result<SyncOutcome, SyncError> {
        self.synchronize_cycle()
            .instrument(info_span!("synchronize", work_dir = %self.work_dir.display()))
            .await
    }

    async fn synchronize_cycle(&self) -> Result<SyncOutcome, SyncError> {
        if !self.is_initialized() {
            info!("No working copy, initializing");
            self.force_initialize().await?;
        } else {
            let previous = self.status.current();
            self.status.replace(Status::cycle_start(&previous)).await;

            let dirty = self.check_uncommitted().await;
            if self.end_pulling_on_err(dirty).await? {
                debug!("Uncommitted changes present, not pulling");
                self.status
                    .update(|s| {
                        s.is_pulling = false;
                        s.has_local_changes = true;
                    })
                    .await;
                return Ok(SyncOutcome::SKIPPED);
            }
        }

        let Some(_guard) = self.lock.try_acquire() else {
            debug!("Staging lock is busy, skipping sync");
            self.status.update(|s| s.is_pulling = false).await;
            return Ok(SyncOutcome::SKIPPED);
        };

        // Clean apart from OS clutter; drop that before touching history.
        let cleaned = self.reset_artifacts_unlocked();
        self.end_pulling_on_err(cleaned).await?;

        if self.needs_password() {
            self.status
                .update(|s| {
                    s.needs_password = true;
                    s.is_pulling = false;
                })
                .await;
            return Ok(SyncOutcome::SKIPPED);
        }

        self.status
            .update(|s| {
                s.needs_password = false;
                s.is_online = true;
                s.is_pulling = true;
            })
            .await;

        let pull = WorkerRequest::Pull {
            remote: self.remote_spec(),
            author: self.author.clone(),
        };
        if let Err(err) = self.worker.call(pull).await {
            let now = self.clock.now();
            self.status
                .update(|s| {
                    s.is_pulling = false;
                    s.is_pushing = false;
                    s.last_synchronized = Some(now);
                    s.is_online = false;
                })
                .await;
            self.handle_git_error(&err).await;
            return Ok(SyncOutcome::SKIPPED);
        }

        match self.list_local_commits() {
            Ok(ahead) if !ahead.is_empty() => {
                debug!(count = ahead.len(), "Local commits not on remote yet");
                self.push_pending.store(true, Ordering::SeqCst);
            }
            Ok(_) => {}
            Err(e) => warn!("Could not list local commits: {e}"),
        }

        if self.is_push_pending() {
            self.status.update(|s| s.is_pushing = true).await;
            if let Err(err) = self.worker.call(WorkerRequest::Push(self.remote_spec())).await {
                let now = self.clock.now();
                self.status
                    .update(|s| {
                        s.is_pulling = false;
                        s.is_pushing = false;
                        s.last_synchronized = Some(now);
                    })
                    .await;
                self.handle_git_error(&err).await;
                return Ok(SyncOutcome {
                    completed: false,
                    possibly_mutated_data: true,
                });
            }
            self.push_pending.store(false, Ordering::SeqCst);
        }

        let now = self.clock.now();
        self.status
            .update(|s| {
                s.status_relative_to_local = StatusRelativeToLocal::Updated;
                s.is_online = true;
                s.is_misconfigured = false;
                s.last_synchronized = Some(now);
                s.needs_password = false;
                s.is_pushing = false;
                s.is_pulling = false;
            })
            .await;
        info!("Synchronized");

        Ok(SyncOutcome {
            completed: true,
            possibly_mutated_data: true,
        })
    }

    /// Pass `result` through, clearing `is_pulling` first if it failed.
    async fn end_pulling_on_err<T>(&self, result: Result<T, SyncError>) -> Result<T, SyncError> {
        if result.is_err() {
            self.status.update(|s| s.is_pulling = false).await;
        }
        result
    }

    fn reset_artifacts_unlocked(&self) -> Result<(), SyncError> {
        let repo = working_copy::open(&self.work_dir)?;
        let artifacts: Vec<String> = working_copy::changed_paths(&repo, true)?
            .into_iter()
            .filter(|p| working_copy::is_artifact(p))
            .collect();
        working_copy::reset_paths(&repo, &self.work_dir, &artifacts)
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("work_dir", &self.work_dir)
            .field("repo_url", &self.repo_url)
            .field("auth", &*self.credentials())
            .field("push_pending", &self.is_push_pending())
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

async fn remove_dir_if_exists(dir: &Path) -> Result<(), SyncError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
