//! Typed record managers.
//!
//! A [`Manager`] maps objects of one model type to records under its own
//! subdirectory of the working copy, commits them with default messages such
//! as `create item a1`, and claims its subtree during orphan sweeps.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;
use crate::backend::{FilesystemManager, Record, StorageBackend};

mod errors;

pub use errors::ManagerError;

/// Domain-level identifier of a record.
pub type ObjectId = String;

/// Whether and how a mutation is committed right away.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// Leave the change uncommitted.
    #[default]
    Skip,
    /// Commit with a default message.
    Auto,
    /// Commit with the given message.
    Message(String),
}

impl From<bool> for CommitMode {
    fn from(commit: bool) -> Self {
        if commit {
            CommitMode::Auto
        } else {
            CommitMode::Skip
        }
    }
}

impl From<&str> for CommitMode {
    fn from(message: &str) -> Self {
        CommitMode::Message(message.to_string())
    }
}

impl From<String> for CommitMode {
    fn from(message: String) -> Self {
        CommitMode::Message(message)
    }
}

/// Told which objects changed after commits, discards and syncs.
///
/// `None` means any object may have changed.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn report_updated_data(&self, ids: Option<&[ObjectId]>);
}

/// Per-model settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerOptions {
    /// Directory holding this model's records, relative to the working copy.
    pub subdir: String,
    /// Field of the serialized object carrying its ID.
    pub id_field: String,
    /// Fields stored in the metadata companion, if any.
    #[serde(default)]
    pub meta_fields: Option<Vec<String>>,
    /// Model name used in default commit messages.
    pub short_name: String,
}

impl ManagerOptions {
    pub fn new(subdir: impl Into<String>, short_name: impl Into<String>) -> Self {
        Self {
            subdir: subdir.into(),
            id_field: "id".to_string(),
            meta_fields: None,
            short_name: short_name.into(),
        }
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn with_meta_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

pub struct Manager<M> {
    options: ManagerOptions,
    backend: Arc<StorageBackend>,
    notifier: Arc<dyn ChangeNotifier>,
    _model: PhantomData<fn() -> M>,
}

impl<M> Manager<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a manager and register it with the backend.
    pub fn new(
        backend: Arc<StorageBackend>,
        options: ManagerOptions,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            options: ManagerOptions {
                subdir: options.subdir.trim_matches('/').to_string(),
                ..options
            },
            backend,
            notifier,
            _model: PhantomData,
        });
        manager.backend.register_manager(&manager);
        manager
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Working-copy relative path of an object.
    pub fn db_ref(&self, id: &str) -> String {
        if self.options.subdir.is_empty() {
            id.to_string()
        } else {
            format!("{}/{id}", self.options.subdir)
        }
    }

    /// [`Self::db_ref`], for IDs naming exactly one entry in this manager's
    /// directory.
    fn object_ref(&self, id: &str) -> std::result::Result<String, ManagerError> {
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
            return Err(ManagerError::InvalidId { id: id.to_string() });
        }
        Ok(self.db_ref(id))
    }

    fn object_refs(&self, ids: &[ObjectId]) -> std::result::Result<Vec<String>, ManagerError> {
        ids.iter().map(|id| self.object_ref(id)).collect()
    }

    /// Object ID owning a working-copy relative path: the first path
    /// component below this manager's subdirectory.
    pub fn get_obj_id(&self, path: &str) -> std::result::Result<ObjectId, ManagerError> {
        if Path::new(path).is_absolute() {
            return Err(ManagerError::AbsolutePath {
                path: path.to_string(),
            });
        }
        let relative = self
            .strip_subdir(path)
            .unwrap_or(path)
            .trim_start_matches('/');
        Ok(relative.split('/').next().unwrap_or_default().to_string())
    }

    fn strip_subdir<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.options.subdir.is_empty() {
            return Some(path);
        }
        path.strip_prefix(self.options.subdir.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
    }

    fn meta_fields(&self) -> Option<&[String]> {
        self.options.meta_fields.as_deref()
    }

    fn to_record(&self, obj: &M) -> Result<(ObjectId, Record)> {
        let record = match serde_json::to_value(obj)? {
            serde_json::Value::Object(record) => record,
            other => {
                return Err(ManagerError::InvalidObject {
                    reason: format!("serialized to {other}"),
                }
                .into());
            }
        };
        let id = match record.get(&self.options.id_field) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                return Err(ManagerError::MissingId {
                    field: self.options.id_field.clone(),
                }
                .into());
            }
        };
        Ok((id, record))
    }

    fn from_record(record: Record) -> Result<M> {
        Ok(serde_json::from_value(serde_json::Value::Object(record))?)
    }

    // CRUD

    pub async fn create(&self, obj: &M, commit: impl Into<CommitMode>) -> Result<ObjectId> {
        let (id, record) = self.to_record(obj)?;
        self.backend
            .create(&self.object_ref(&id)?, &record, self.meta_fields())
            .await?;
        self.after_mutation(&id, commit.into(), "create").await?;
        Ok(id)
    }

    pub async fn read(&self, id: &str) -> Result<M> {
        Self::from_record(self.backend.read(&self.object_ref(id)?).await?)
    }

    /// The object as of a past version.
    pub async fn read_version(&self, id: &str, version: &str) -> Result<M> {
        let path = self.object_ref(id)?;
        Self::from_record(self.backend.read_version(&path, version).await?)
    }

    /// Every object, or only the listed ones, keyed by ID.
    pub async fn read_all(&self, only_ids: Option<&[ObjectId]>) -> Result<BTreeMap<ObjectId, M>> {
        let index = self
            .backend
            .get_index(&self.options.subdir, &self.options.id_field, only_ids)
            .await?;
        index
            .into_iter()
            .map(|(id, record)| Ok((id, Self::from_record(record)?)))
            .collect()
    }

    pub async fn list_ids(&self) -> Result<Vec<ObjectId>> {
        self.backend.list_ids(&self.options.subdir).await
    }

    /// Replace an object. Its ID may not change.
    pub async fn update(&self, id: &str, obj: &M, commit: impl Into<CommitMode>) -> Result<()> {
        let (found, record) = self.to_record(obj)?;
        if found != id {
            return Err(ManagerError::IdMismatch {
                expected: id.to_string(),
                found,
            }
            .into());
        }
        self.backend
            .update(&self.object_ref(id)?, &record, self.meta_fields())
            .await?;
        self.after_mutation(id, commit.into(), "update").await
    }

    pub async fn delete(&self, id: &str, commit: impl Into<CommitMode>) -> Result<()> {
        self.backend.delete(&self.object_ref(id)?).await?;
        self.after_mutation(id, commit.into(), "delete").await
    }

    async fn after_mutation(&self, id: &str, commit: CommitMode, verb: &str) -> Result<()> {
        let message = match commit {
            CommitMode::Skip => return Ok(()),
            CommitMode::Auto => self.format_commit_message(verb, id),
            CommitMode::Message(message) => message,
        };
        self.commit_one(id, &message).await?;
        self.notifier
            .report_updated_data(Some(&[id.to_string()]))
            .await;
        Ok(())
    }

    fn format_commit_message(&self, verb: &str, id: &str) -> String {
        format!("{verb} {} {id}", self.options.short_name)
    }

    /// Commit one object, surfacing version-control failures as
    /// [`ManagerError::Commit`].
    async fn commit_one(&self, id: &str, message: &str) -> Result<()> {
        match self.backend.commit(&[self.object_ref(id)?], message).await {
            Ok(count) => {
                debug!(id, count, "Committed object");
                Ok(())
            }
            Err(crate::Error::Sync(e)) => match e.git_code() {
                Some(code) => Err(ManagerError::Commit {
                    code,
                    message: e.to_string(),
                }
                .into()),
                None => Err(e.into()),
            },
            Err(e) => Err(e),
        }
    }

    // Versioning

    pub async fn commit(&self, ids: &[ObjectId], message: &str) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let paths = self.object_refs(ids)?;
        self.backend.commit(&paths, message).await?;
        self.notifier.report_updated_data(Some(ids)).await;
        Ok(())
    }

    pub async fn discard(&self, ids: &[ObjectId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let paths = self.object_refs(ids)?;
        self.backend.discard(&paths).await?;
        self.notifier.report_updated_data(Some(ids)).await;
        Ok(())
    }

    /// IDs of this manager's objects with uncommitted changes.
    pub async fn list_uncommitted(&self) -> Result<Vec<ObjectId>> {
        let mut ids: Vec<ObjectId> = Vec::new();
        for path in self.backend.list_uncommitted().await? {
            if !self.manages_file_at_path(&path) {
                continue;
            }
            let id = self.get_obj_id(&path)?;
            if !id.is_empty() && !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl<M> FilesystemManager for Manager<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn manages_file_at_path(&self, path: &str) -> bool {
        self.strip_subdir(path).is_some()
    }

    async fn data_synchronized(&self) {
        self.notifier.report_updated_data(None).await;
    }
}

impl<M> std::fmt::Debug for Manager<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
