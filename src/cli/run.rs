use super::load_app;
use crate::app::AppMode;
use crate::backup::run_backup;
use clap::Args;
use std::path::Path;

#[derive(Args)]
pub struct RunArgs {}

/// Run one backup of every data source
pub async fn run(_args: RunArgs, config: &Path) -> anyhow::Result<()> {
    let app = load_app(config, AppMode::Cli).await?;
    let ids = run_backup(&app).await?;

    for id in ids {
        let backup = app.store.get_backup(id).await?;
        println!("{}  {}  {}", backup.id, backup.label, backup.status);
    }
    Ok(())
}
