//! Error types for the storage backend.

use thiserror::Error;

/// Errors that can occur during record storage operations.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BackendError {
    /// A record already exists where a new one was to be created.
    #[error("Unique constraint violated: {field} {value} already exists")]
    UniqueConstraint {
        /// Which constraint was violated
        field: String,
        /// The conflicting value
        value: String,
    },

    /// No record at the given path.
    #[error("Record not found: {path}")]
    RecordNotFound {
        /// Working-copy relative path of the record
        path: String,
    },

    /// Record content could not be interpreted.
    #[error("Invalid record at {path}: {reason}")]
    InvalidRecord {
        /// Working-copy relative path of the record
        path: String,
        /// What was wrong with it
        reason: String,
    },

    /// Record content is not valid YAML, or could not be written as YAML.
    #[error("Malformed record at {path}")]
    MalformedRecord {
        /// Working-copy relative path of the record
        path: String,
        /// The underlying parse error
        #[source]
        source: serde_yaml::Error,
    },

    /// File I/O error.
    #[error("File I/O error at {path}")]
    FileIo {
        /// Working-copy relative path being accessed
        path: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    pub(crate) fn io(path: &str, source: std::io::Error) -> Self {
        BackendError::FileIo {
            path: path.to_string(),
            source,
        }
    }

    /// Check if this error indicates a record was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::RecordNotFound { .. })
    }

    /// Check if this error indicates a uniqueness violation.
    pub fn is_unique_constraint(&self) -> bool {
        matches!(self, BackendError::UniqueConstraint { .. })
    }

    /// Check if this error is about unreadable record content.
    pub fn is_invalid_record(&self) -> bool {
        matches!(
            self,
            BackendError::InvalidRecord { .. } | BackendError::MalformedRecord { .. }
        )
    }

    /// Check if this error is related to I/O operations.
    pub fn is_io_error(&self) -> bool {
        matches!(self, BackendError::FileIo { .. })
    }

    /// The record path this error is about.
    pub fn path(&self) -> Option<&str> {
        match self {
            BackendError::RecordNotFound { path }
            | BackendError::InvalidRecord { path, .. }
            | BackendError::MalformedRecord { path, .. }
            | BackendError::FileIo { path, .. } => Some(path),
            BackendError::UniqueConstraint { value, .. } => Some(value),
        }
    }
}

// Conversion from BackendError to the main Error type
impl From<BackendError> for crate::Error {
    fn from(err: BackendError) -> Self {
        crate::Error::Backend(err)
    }
}
