use super::load_app;
use crate::app::AppMode;
use crate::backup::retry_backup;
use clap::Args;
use std::path::Path;
use uuid::Uuid;

#[derive(Args)]
pub struct RetryArgs {
    /// Id of the failed backup
    pub id: Uuid,
}

pub async fn run(args: RetryArgs, config: &Path) -> anyhow::Result<()> {
    let app = load_app(config, AppMode::Cli).await?;
    let backup = retry_backup(&app, args.id).await?;
    println!("Backup {} is {}", backup.id, backup.status);
    Ok(())
}
