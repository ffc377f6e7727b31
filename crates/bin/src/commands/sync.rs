//! Sync and watch commands.

use std::sync::Arc;

use gitstore::StorageBackend;
use tracing::{info, warn};

use super::CommandResult;
use crate::cli::SyncArgs;
use crate::output::{OutputFormat, print_json, print_status};

/// Run the sync command
pub async fn run(
    backend: &Arc<StorageBackend>,
    args: &SyncArgs,
    format: OutputFormat,
) -> CommandResult {
    let outcome = backend.init(args.force_reset).await?;
    let status = backend.engine().status();

    match format {
        OutputFormat::Human => {
            if outcome.completed {
                println!("Synchronized");
            } else {
                println!("Synchronization did not complete");
            }
            print_status(&status, format)?;
        }
        OutputFormat::Json => {
            print_json(&serde_json::json!({
                "outcome": outcome,
                "status": status,
            }))?;
        }
    }

    Ok(())
}

/// Run the watch command: periodic sync, printing every status change until
/// Ctrl+C.
pub async fn watch(backend: &Arc<StorageBackend>, format: OutputFormat) -> CommandResult {
    let mut changes = backend.engine().subscribe();
    let outcome = backend.init(false).await?;
    info!(completed = outcome.completed, "Initial synchronization finished");
    print_status(&changes.borrow_and_update(), format)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
            changed = changes.changed() => {
                if changed.is_err() {
                    warn!("Status channel closed");
                    break;
                }
                let status = changes.borrow_and_update().clone();
                print_status(&status, format)?;
            }
        }
    }

    Ok(())
}
