//! Filesystem capability consumed by the storage backend.

use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;

use super::errors::BackendError;

/// A structured record: a mapping of field names to values. On disk it is a
/// YAML mapping.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Reads and writes records as files below a root directory.
///
/// Paths are relative to [`RecordFs::root`] and `/`-separated. Writing
/// `None` is an absence marker: the record disappears from disk.
#[async_trait]
pub trait RecordFs: Send + Sync + Debug {
    fn root(&self) -> &Path;

    async fn read(&self, path: &str) -> Result<Record, BackendError>;

    /// Write or remove a record. With `meta_fields`, the listed fields are
    /// stored in a metadata companion next to the rest.
    async fn write(
        &self,
        path: &str,
        record: Option<&Record>,
        meta_fields: Option<&[String]>,
    ) -> Result<(), BackendError>;

    async fn exists(&self, path: &str) -> Result<bool, BackendError>;

    /// Every record directly inside `subdir`, optionally only those whose
    /// entry names are listed in `only_ids`.
    async fn read_all(
        &self,
        subdir: &str,
        only_ids: Option<&[String]>,
    ) -> Result<Vec<Record>, BackendError>;

    /// Entry names directly inside `subdir`.
    async fn list_ids(&self, subdir: &str) -> Result<Vec<String>, BackendError>;

    /// Parse raw file content into a record.
    fn parse_data(&self, path: &str, data: &[u8]) -> Result<Record, BackendError>;
}
