//! Credentials and author identity for remote operations.
//!
//! The password lives only in process memory. It is wiped on drop, redacted
//! from `Debug` output and never serialized.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::error::{GitErrorCode, SyncError};

/// Username and optional in-memory password for the remote.
#[derive(Clone, Default)]
pub struct AuthCredentials {
    pub username: String,
    password: Option<Zeroizing<String>>,
}

impl AuthCredentials {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
        }
    }

    /// Set or clear the password. Blank values count as absent.
    pub fn set_password(&mut self, value: Option<String>) {
        self.password = value
            .filter(|v| !v.trim().is_empty())
            .map(Zeroizing::new);
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().map(String::as_str)
    }

    pub fn needs_password(&self) -> bool {
        self.password.is_none()
    }
}

impl fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCredentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Commit author identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Build a signature stamped with the current time.
    ///
    /// A blank name or email is a `MissingIdentity` error.
    pub fn signature(&self) -> Result<git2::Signature<'static>, SyncError> {
        if self.name.trim().is_empty() || self.email.trim().is_empty() {
            return Err(SyncError::git(
                GitErrorCode::MissingIdentity,
                "author name and email must be configured",
            ));
        }
        Ok(git2::Signature::now(&self.name, &self.email)?)
    }
}
