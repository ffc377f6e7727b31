use std::sync::Arc;

use clap::Parser;
use gitstore::StorageBackend;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod output;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gitstore=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let backend = StorageBackend::new(cli.repo.options()?);
    backend.set_password(cli.repo.password.clone()).await;

    // Without application managers every path belongs to the command line.
    let claim_all = Arc::new(commands::ClaimAll);
    backend.register_manager(&claim_all);

    let result = match &cli.command {
        Commands::Status => commands::status::run(&backend, cli.format).await,
        Commands::Sync(args) => commands::sync::run(&backend, args, cli.format).await,
        Commands::Watch => commands::sync::watch(&backend, cli.format).await,
        Commands::Uncommitted => commands::changes::uncommitted(&backend, cli.format).await,
        Commands::LocalCommits => commands::changes::local_commits(&backend, cli.format).await,
        Commands::Commit(args) => commands::changes::commit(&backend, args, cli.format).await,
        Commands::Discard(args) => commands::changes::discard(&backend, args, cli.format).await,
    };

    backend.stop();
    result
}
