//! Record storage on top of a synchronized working copy.
//!
//! [`StorageBackend`] exposes record-level CRUD, listing and indexing over
//! files in the working copy, and commits or discards them through its
//! [`SyncEngine`]. It keeps a registry of [`FilesystemManager`]s to tell
//! managed file changes from orphaned ones, drives periodic synchronization
//! and tells every manager when a sync may have changed its data.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::Result;
use crate::constants::{BODY_FILE, DEFAULT_SYNC_INTERVAL, META_FILE};
use crate::sync::{GitErrorCode, RepoConfig, Status, StatusReporter, SyncEngine, SyncOutcome};

mod errors;
mod file_tree;
mod fs;

pub use errors::BackendError;
pub use file_tree::FileTree;
pub use fs::{Record, RecordFs};

/// Human-readable kind of this backend, reported by [`StorageBackend::describe`].
pub const VERBOSE_NAME: &str = "Git repository";

/// Options for a [`StorageBackend`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendOptions {
    #[serde(flatten)]
    pub repo: RepoConfig,
    /// Time between periodic synchronization cycles, in seconds.
    #[serde(default = "default_sync_interval", with = "duration_secs")]
    pub sync_interval: Duration,
}

impl BackendOptions {
    pub fn new(repo: RepoConfig) -> Self {
        Self {
            repo,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

fn default_sync_interval() -> Duration {
    DEFAULT_SYNC_INTERVAL
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// A component owning part of the working copy.
///
/// Consulted before commits to decide which changed files are orphaned, and
/// told after every sync that may have changed data on disk.
#[async_trait]
pub trait FilesystemManager: Send + Sync {
    /// Whether this manager owns the working-copy relative `path`.
    fn manages_file_at_path(&self, path: &str) -> bool;

    /// Data on disk may have changed under this manager.
    async fn data_synchronized(&self);
}

/// Summary of a backend for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescription {
    pub verbose_name: String,
    pub repo_url: String,
    pub username: String,
    pub status: Status,
}

pub struct StorageBackend {
    engine: SyncEngine,
    fs: Arc<dyn RecordFs>,
    managers: RwLock<Vec<Weak<dyn FilesystemManager>>>,
    sync_interval: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl StorageBackend {
    /// Backend over a [`FileTree`] rooted at the working directory.
    pub fn new(options: BackendOptions) -> Arc<Self> {
        let fs = Arc::new(FileTree::new(options.repo.work_dir.clone()));
        Self::with_parts(SyncEngine::new(options.repo), fs, options.sync_interval)
    }

    /// Backend reporting every status change to `reporter`.
    pub fn with_reporter(options: BackendOptions, reporter: Arc<dyn StatusReporter>) -> Arc<Self> {
        let fs = Arc::new(FileTree::new(options.repo.work_dir.clone()));
        let engine = SyncEngine::new(options.repo).with_reporter(reporter);
        Self::with_parts(engine, fs, options.sync_interval)
    }

    pub fn with_parts(
        engine: SyncEngine,
        fs: Arc<dyn RecordFs>,
        sync_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            fs,
            managers: RwLock::new(Vec::new()),
            sync_interval,
            timer: Mutex::new(None),
        })
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn fs(&self) -> &Arc<dyn RecordFs> {
        &self.fs
    }

    // Lifecycle

    /// Prepare the working copy, start periodic synchronization and run one
    /// cycle right away.
    pub async fn init(self: &Arc<Self>, force_reset: bool) -> Result<SyncOutcome> {
        self.engine.init(force_reset).await?;
        self.schedule_sync();
        self.synchronize().await
    }

    /// Start the periodic sync timer, replacing any previous one.
    fn schedule_sync(self: &Arc<Self>) {
        let backend = Arc::downgrade(self);
        let period = self.sync_interval;

        let handle = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // The first tick completes immediately; init syncs on its own.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let Some(backend) = backend.upgrade() else {
                        debug!("Backend dropped, stopping sync timer");
                        break;
                    };
                    if let Err(e) = backend.synchronize().await {
                        warn!("Periodic sync failed: {e}");
                    }
                }
            }
            .instrument(info_span!("sync_timer", period_secs = period.as_secs())),
        );

        let previous = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            debug!("Replacing previous sync timer");
            previous.abort();
        }
    }

    /// Whether a periodic sync timer is active.
    pub fn is_scheduled(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancel the sync timer and stop the network worker.
    pub fn stop(&self) {
        if let Some(handle) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.engine.terminate();
    }

    /// Run one sync cycle and notify managers if data may have changed.
    pub async fn synchronize(&self) -> Result<SyncOutcome> {
        let outcome = self.engine.synchronize().await?;
        if outcome.possibly_mutated_data {
            for manager in self.managers() {
                manager.data_synchronized().await;
            }
        }
        Ok(outcome)
    }

    /// Set or clear the remote password.
    pub async fn set_password(&self, value: Option<String>) {
        self.engine.set_password(value).await;
    }

    pub fn describe(&self) -> BackendDescription {
        BackendDescription {
            verbose_name: VERBOSE_NAME.to_string(),
            repo_url: self.engine.repo_url().to_string(),
            username: self.engine.username(),
            status: self.engine.status(),
        }
    }

    // Manager registry

    /// Add a manager to the ownership registry. Only a weak reference is
    /// kept; dropped managers fall out on their own.
    pub fn register_manager<M: FilesystemManager + 'static>(&self, manager: &Arc<M>) {
        let weak = Arc::downgrade(manager) as Weak<dyn FilesystemManager>;
        let mut managers = self
            .managers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        managers.retain(|m| m.strong_count() > 0);
        managers.push(weak);
    }

    fn managers(&self) -> Vec<Arc<dyn FilesystemManager>> {
        self.managers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Reset every changed file no registered manager claims.
    pub async fn reset_orphaned_file_changes(&self) -> Result<Vec<String>> {
        let managers = self.managers();
        let orphaned = self
            .engine
            .reset_orphaned_file_changes(move |path| {
                managers.iter().any(|m| m.manages_file_at_path(path))
            })
            .await?;
        Ok(orphaned)
    }

    // Records

    pub async fn create(
        &self,
        path: &str,
        record: &Record,
        meta_fields: Option<&[String]>,
    ) -> Result<()> {
        if self.fs.exists(path).await? {
            return Err(BackendError::UniqueConstraint {
                field: "filesystem path".to_string(),
                value: path.to_string(),
            }
            .into());
        }
        self.fs.write(path, Some(record), meta_fields).await?;
        Ok(())
    }

    pub async fn read(&self, path: &str) -> Result<Record> {
        Ok(self.fs.read(path).await?)
    }

    /// A record as of `version`, a commit id or other revision.
    pub async fn read_version(&self, path: &str, version: &str) -> Result<Record> {
        match self.engine.read_file_at_commit(path, version) {
            Ok(data) => Ok(self.fs.parse_data(path, &data)?),
            Err(e) if e.git_code() == Some(GitErrorCode::NotFound) => {
                // Directory form: body plus metadata companion.
                let mut record = Record::new();
                let mut found = false;
                for part in [BODY_FILE, META_FILE] {
                    let rel = format!("{path}/{part}");
                    if let Ok(data) = self.engine.read_file_at_commit(&rel, version) {
                        record.extend(self.fs.parse_data(&rel, &data)?);
                        found = true;
                    }
                }
                if found {
                    Ok(record)
                } else {
                    Err(e.into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn update(
        &self,
        path: &str,
        record: &Record,
        meta_fields: Option<&[String]>,
    ) -> Result<()> {
        self.fs.write(path, Some(record), meta_fields).await?;
        Ok(())
    }

    /// Remove the record from disk. Its removal from history is staged by
    /// the next [`commit`](Self::commit) that selects it.
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.fs.write(path, None, None).await?;
        Ok(())
    }

    pub async fn list_ids(&self, subdir: &str) -> Result<Vec<String>> {
        Ok(self.fs.list_ids(subdir).await?)
    }

    /// Records in `subdir` keyed by their own `id_field`.
    ///
    /// Records lacking the field are skipped with a warning.
    pub async fn get_index(
        &self,
        subdir: &str,
        id_field: &str,
        only_ids: Option<&[String]>,
    ) -> Result<BTreeMap<String, Record>> {
        let mut index = BTreeMap::new();
        for record in self.fs.read_all(subdir, only_ids).await? {
            let id = match record.get(id_field) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => {
                    warn!(subdir, id_field, "Record without usable id field, skipping");
                    continue;
                }
            };
            index.insert(id, record);
        }
        Ok(index)
    }

    // Versioning

    /// Commit exactly the changes under `paths`.
    ///
    /// Orphaned changes are reset first; unrelated dirty files stay dirty.
    /// Returns the number of files committed.
    pub async fn commit(&self, paths: &[String], message: &str) -> Result<usize> {
        self.reset_orphaned_file_changes().await?;

        let selected = self.engine.list_changed_files(paths)?;
        if selected.is_empty() {
            debug!(?paths, "Nothing to commit");
            self.engine.check_uncommitted().await?;
            return Ok(0);
        }

        let work_dir = self.engine.work_dir();
        let removing = selected.iter().all(|p| !work_dir.join(p).exists());
        let count = self
            .engine
            .stage_and_commit(&selected, message, removing)
            .await?;
        if count > 0 {
            self.engine.request_push().await;
        }
        self.engine.check_uncommitted().await?;
        Ok(count)
    }

    /// Throw away uncommitted changes under `paths`.
    pub async fn discard(&self, paths: &[String]) -> Result<Vec<String>> {
        let reset = self.engine.reset_files(Some(paths)).await?;
        if !reset.is_empty() {
            info!(count = reset.len(), "Discarded local changes");
        }
        self.engine.check_uncommitted().await?;
        Ok(reset)
    }

    /// Changed record paths, deduplicated.
    ///
    /// A record stored in directory form is listed once by its directory.
    pub async fn list_uncommitted(&self) -> Result<Vec<String>> {
        let changed = self.engine.list_changed_files(&["."])?;
        let refs: BTreeSet<String> = changed
            .into_iter()
            .map(|path| record_ref(&path).to_string())
            .collect();
        Ok(refs.into_iter().collect())
    }

    pub async fn count_uncommitted(&self) -> Result<usize> {
        Ok(self.engine.list_changed_files(&["."])?.len())
    }

    pub async fn check_uncommitted(&self) -> Result<bool> {
        Ok(self.engine.check_uncommitted().await?)
    }
}

/// Strip a trailing metadata companion or body file name.
fn record_ref(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((dir, name)) if name == META_FILE || name == BODY_FILE => dir,
        _ => path,
    }
}

impl Drop for StorageBackend {
    fn drop(&mut self) {
        if let Some(handle) = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBackend")
            .field("engine", &self.engine)
            .field("fs", &self.fs)
            .field("sync_interval", &self.sync_interval)
            .field("scheduled", &self.is_scheduled())
            .finish_non_exhaustive()
    }
}
