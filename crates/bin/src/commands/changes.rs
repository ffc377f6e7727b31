//! Commands inspecting and recording local changes.

use gitstore::StorageBackend;

use super::CommandResult;
use crate::cli::{CommitArgs, DiscardArgs};
use crate::output::{OutputFormat, print_json, print_list};

/// List uncommitted record paths
pub async fn uncommitted(backend: &StorageBackend, format: OutputFormat) -> CommandResult {
    let paths = backend.list_uncommitted().await?;
    print_list(&paths, format)?;
    Ok(())
}

/// List local commits the remote does not have yet
pub async fn local_commits(backend: &StorageBackend, format: OutputFormat) -> CommandResult {
    let commits = backend.engine().list_local_commits()?;
    print_list(&commits, format)?;
    Ok(())
}

/// Commit the given paths
pub async fn commit(
    backend: &StorageBackend,
    args: &CommitArgs,
    format: OutputFormat,
) -> CommandResult {
    let count = backend.commit(&args.paths, &args.message).await?;
    let outcome = if args.sync && count > 0 {
        Some(backend.synchronize().await?)
    } else {
        None
    };

    match format {
        OutputFormat::Human => {
            println!("Committed {count} file(s)");
            if let Some(outcome) = outcome {
                let verdict = if outcome.completed {
                    "completed"
                } else {
                    "did not complete"
                };
                println!("Sync {verdict}");
            }
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "committed": count,
            "sync": outcome,
        }))?,
    }
    Ok(())
}

/// Discard the given paths
pub async fn discard(
    backend: &StorageBackend,
    args: &DiscardArgs,
    format: OutputFormat,
) -> CommandResult {
    let reset = backend.discard(&args.paths).await?;
    match format {
        OutputFormat::Human => println!("Discarded {} file(s)", reset.len()),
        OutputFormat::Json => print_json(&serde_json::json!({ "discarded": reset }))?,
    }
    Ok(())
}
