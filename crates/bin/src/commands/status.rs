//! Status command - describes the backend and its working copy.

use gitstore::StorageBackend;

use super::CommandResult;
use crate::output::{OutputFormat, print_json, print_table, relative_label};

/// Run the status command
pub async fn run(backend: &StorageBackend, format: OutputFormat) -> CommandResult {
    let engine = backend.engine();
    let initialized = engine.is_initialized();
    if initialized {
        backend.check_uncommitted().await?;
    }
    let description = backend.describe();
    let uncommitted = if initialized {
        backend.count_uncommitted().await?
    } else {
        0
    };

    match format {
        OutputFormat::Human => {
            println!("{} at {}", description.verbose_name, engine.work_dir().display());
            println!("Remote:      {}", description.repo_url);
            println!("Username:    {}", description.username);
            println!("Initialized: {initialized}");
            println!("Uncommitted: {uncommitted}");
            println!();
            let status = &description.status;
            print_table(
                &["ONLINE", "REMOTE", "LOCAL CHANGES", "NEEDS PASSWORD"],
                &[vec![
                    status.is_online.to_string(),
                    relative_label(status),
                    status.has_local_changes.to_string(),
                    status.needs_password.to_string(),
                ]],
            );
        }
        OutputFormat::Json => {
            let value = serde_json::json!({
                "backend": description,
                "initialized": initialized,
                "uncommitted": uncommitted,
            });
            print_json(&value)?;
        }
    }

    Ok(())
}
