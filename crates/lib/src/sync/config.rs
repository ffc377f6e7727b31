//! Configuration of a single working copy and its remote.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::auth::Author;

/// Where the working copy lives, which remote it tracks and who commits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Local directory holding the working copy.
    pub work_dir: PathBuf,
    /// URL of the `origin` remote.
    pub repo_url: String,
    /// Username for remote authentication.
    pub username: String,
    pub author_name: String,
    pub author_email: String,
}

impl RepoConfig {
    pub fn author(&self) -> Author {
        Author::new(&self.author_name, &self.author_email)
    }
}
