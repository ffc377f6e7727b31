//! CLI argument definitions for the gitstore binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gitstore::{BackendOptions, RepoConfig};

use crate::output::OutputFormat;

/// Git-backed record storage
#[derive(Parser, Debug)]
#[command(name = "gitstore")]
#[command(about = "Keep structured records in a git working copy synchronized with a remote")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub repo: RepoArgs,

    /// Output format
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show repository and synchronization status
    Status,
    /// Run one synchronization cycle
    Sync(SyncArgs),
    /// Synchronize periodically until interrupted
    Watch,
    /// List uncommitted record paths
    Uncommitted,
    /// List local commits not yet on the remote
    LocalCommits,
    /// Commit changes under the given paths
    Commit(CommitArgs),
    /// Discard uncommitted changes under the given paths
    Discard(DiscardArgs),
}

/// Where the working copy lives and how to reach its remote.
#[derive(clap::Args, Debug)]
pub struct RepoArgs {
    /// Local working copy directory
    #[arg(short = 'w', long, env = "GITSTORE_WORK_DIR", global = true)]
    pub work_dir: Option<PathBuf>,

    /// Remote repository URL
    #[arg(long, env = "GITSTORE_REPO_URL", global = true)]
    pub repo_url: Option<String>,

    /// Username for the remote
    #[arg(short, long, env = "GITSTORE_USERNAME", default_value = "", global = true)]
    pub username: String,

    /// Commit author name
    #[arg(long, env = "GITSTORE_AUTHOR_NAME", default_value = "", global = true)]
    pub author_name: String,

    /// Commit author email
    #[arg(long, env = "GITSTORE_AUTHOR_EMAIL", default_value = "", global = true)]
    pub author_email: String,

    /// Seconds between periodic synchronization cycles
    #[arg(long, env = "GITSTORE_SYNC_INTERVAL", default_value_t = 50, global = true)]
    pub sync_interval: u64,

    /// Password or token for the remote. Kept in memory only.
    #[arg(long, env = "GITSTORE_PASSWORD", hide_env_values = true, hide = true, global = true)]
    pub password: Option<String>,
}

impl RepoArgs {
    /// Backend options, or a message naming what is missing.
    pub fn options(&self) -> Result<BackendOptions, String> {
        let work_dir = self
            .work_dir
            .clone()
            .ok_or("--work-dir (or GITSTORE_WORK_DIR) is required")?;
        let repo_url = self
            .repo_url
            .clone()
            .ok_or("--repo-url (or GITSTORE_REPO_URL) is required")?;

        let mut options = BackendOptions::new(RepoConfig {
            work_dir,
            repo_url,
            username: self.username.clone(),
            author_name: self.author_name.clone(),
            author_email: self.author_email.clone(),
        });
        options.sync_interval = Duration::from_secs(self.sync_interval);
        Ok(options)
    }
}

/// Arguments for the sync command
#[derive(clap::Args, Debug)]
pub struct SyncArgs {
    /// Wipe the working copy and clone afresh first
    #[arg(long)]
    pub force_reset: bool,
}

/// Arguments for the commit command
#[derive(clap::Args, Debug)]
pub struct CommitArgs {
    /// Commit message
    #[arg(short, long)]
    pub message: String,

    /// Paths to commit, relative to the working copy
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Synchronize right after committing
    #[arg(long)]
    pub sync: bool,
}

/// Arguments for the discard command
#[derive(clap::Args, Debug)]
pub struct DiscardArgs {
    /// Paths to discard, relative to the working copy
    #[arg(required = true)]
    pub paths: Vec<String>,
}
