//! Command implementations.

use async_trait::async_trait;
use gitstore::backend::FilesystemManager;
use tracing::info;

pub mod changes;
pub mod status;
pub mod sync;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Claims every path so the orphan sweep before a commit leaves the user's
/// files alone.
#[derive(Debug)]
pub struct ClaimAll;

#[async_trait]
impl FilesystemManager for ClaimAll {
    fn manages_file_at_path(&self, _path: &str) -> bool {
        true
    }

    async fn data_synchronized(&self) {
        info!("Working copy may have changed");
    }
}
