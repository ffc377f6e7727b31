//! Records stored as YAML files in a directory tree.
//!
//! A record is either a single `<path>` file holding a YAML mapping, or, when
//! metadata fields are configured, a `<path>/` directory with a
//! [`META_FILE`] companion for those fields and a [`BODY_FILE`] for the rest.
//! Reads detect the form on their own.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, trace};

use super::errors::BackendError;
use super::fs::{Record, RecordFs};
use crate::constants::{BODY_FILE, META_FILE, OS_ARTIFACTS};

#[derive(Debug, Clone)]
pub struct FileTree {
    root: PathBuf,
}

enum Form {
    File,
    Directory,
}

impl FileTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    async fn form_of(&self, path: &str) -> Result<Option<Form>, BackendError> {
        let full = self.full_path(path);
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => Ok(Some(Form::File)),
            Ok(meta) if meta.is_dir() => {
                let has_parts = is_file(&full.join(META_FILE)).await
                    || is_file(&full.join(BODY_FILE)).await;
                Ok(has_parts.then_some(Form::Directory))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::io(path, e)),
        }
    }

    async fn read_part(&self, path: &str, part: &str) -> Result<Option<Record>, BackendError> {
        let rel = format!("{path}/{part}");
        match tokio::fs::read(self.full_path(&rel)).await {
            Ok(data) => self.parse_data(&rel, &data).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::io(&rel, e)),
        }
    }

    async fn write_yaml(&self, rel: &str, record: &Record) -> Result<(), BackendError> {
        let data =
            serde_yaml::to_string(record).map_err(|source| BackendError::MalformedRecord {
                path: rel.to_string(),
                source,
            })?;
        tokio::fs::write(self.full_path(rel), data)
            .await
            .map_err(|e| BackendError::io(rel, e))
    }

    async fn remove(&self, path: &str) -> Result<(), BackendError> {
        let full = self.full_path(path);
        let result = match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&full).await,
            Ok(_) => tokio::fs::remove_file(&full).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                debug!(path, "Removed record");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackendError::io(path, e)),
        }
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

fn is_hidden_entry(name: &str) -> bool {
    name.starts_with('.') || OS_ARTIFACTS.contains(&name)
}

#[async_trait]
impl RecordFs for FileTree {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn read(&self, path: &str) -> Result<Record, BackendError> {
        match self.form_of(path).await? {
            Some(Form::File) => {
                let data = tokio::fs::read(self.full_path(path))
                    .await
                    .map_err(|e| BackendError::io(path, e))?;
                self.parse_data(path, &data)
            }
            Some(Form::Directory) => {
                let mut record = self.read_part(path, BODY_FILE).await?.unwrap_or_default();
                if let Some(meta) = self.read_part(path, META_FILE).await? {
                    record.extend(meta);
                }
                Ok(record)
            }
            None => Err(BackendError::RecordNotFound {
                path: path.to_string(),
            }),
        }
    }

    async fn write(
        &self,
        path: &str,
        record: Option<&Record>,
        meta_fields: Option<&[String]>,
    ) -> Result<(), BackendError> {
        let Some(record) = record else {
            return self.remove(path).await;
        };

        // Switching between file and directory form replaces the old one.
        self.remove(path).await?;

        match meta_fields.filter(|fields| !fields.is_empty()) {
            None => {
                if let Some(parent) = self.full_path(path).parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| BackendError::io(path, e))?;
                }
                self.write_yaml(path, record).await?;
            }
            Some(fields) => {
                tokio::fs::create_dir_all(self.full_path(path))
                    .await
                    .map_err(|e| BackendError::io(path, e))?;
                let (meta, body): (Record, Record) = record
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .partition(|(k, _)| fields.contains(k));
                self.write_yaml(&format!("{path}/{META_FILE}"), &meta).await?;
                self.write_yaml(&format!("{path}/{BODY_FILE}"), &body).await?;
            }
        }
        trace!(path, "Wrote record");
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, BackendError> {
        Ok(self.form_of(path).await?.is_some())
    }

    async fn read_all(
        &self,
        subdir: &str,
        only_ids: Option<&[String]>,
    ) -> Result<Vec<Record>, BackendError> {
        let mut records = Vec::new();
        for id in self.list_ids(subdir).await? {
            if only_ids.is_some_and(|ids| !ids.contains(&id)) {
                continue;
            }
            let path = if subdir.is_empty() {
                id
            } else {
                format!("{}/{id}", subdir.trim_end_matches('/'))
            };
            records.push(self.read(&path).await?);
        }
        Ok(records)
    }

    async fn list_ids(&self, subdir: &str) -> Result<Vec<String>, BackendError> {
        let mut entries = match tokio::fs::read_dir(self.full_path(subdir)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackendError::io(subdir, e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackendError::io(subdir, e))?
        {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_hidden_entry(&name) {
                continue;
            }
            ids.push(name);
        }
        ids.sort();
        Ok(ids)
    }

    fn parse_data(&self, path: &str, data: &[u8]) -> Result<Record, BackendError> {
        let value: serde_json::Value =
            serde_yaml::from_slice(data).map_err(|source| BackendError::MalformedRecord {
                path: path.to_string(),
                source,
            })?;
        match value {
            serde_json::Value::Object(record) => Ok(record),
            other => Err(BackendError::InvalidRecord {
                path: path.to_string(),
                reason: format!("expected a mapping, found {other}"),
            }),
        }
    }
}
