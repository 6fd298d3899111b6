//! Backupman - scheduled database backups
//!
//! Main binary entry point for the command-line interface.

use backupman::cli::{self, Cli, Commands};
use backupman::logging::init_logging;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = cli.config.as_path();
    match cli.command {
        Commands::Run(args) => cli::run::run(args, config).await,
        Commands::Retry(args) => cli::retry::run(args, config).await,
        Commands::Serve(args) => cli::serve::run(args, config).await,
        Commands::List(args) => cli::list::run(args, config).await,
        Commands::Health(args) => cli::health::run(args, config).await,
        Commands::Schedule(args) => cli::schedule::run(args, config).await,
        Commands::Version(args) => cli::version::run(args),
        Commands::AuthGoogle(args) => cli::auth_google::run(args, config).await,
    }
}
