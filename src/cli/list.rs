use super::load_app;
use crate::app::AppMode;
use crate::backup::list_backups;
use clap::Args;
use std::path::Path;

#[derive(Args)]
pub struct ListArgs {
    /// Print JSON instead of a summary
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ListArgs, config: &Path) -> anyhow::Result<()> {
    let app = load_app(config, AppMode::Cli).await?;
    let backups = list_backups(&app).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
        return Ok(());
    }

    if backups.is_empty() {
        println!("No backups");
        return Ok(());
    }
    for entry in &backups {
        let backup = &entry.backup;
        println!(
            "{}  {}  {}  {}",
            backup.id,
            backup.created_at.format("%Y-%m-%d %H:%M:%S"),
            backup.label,
            backup.status
        );
        for file in &entry.drive_files {
            println!(
                "    {} ({})  {}  {}",
                file.label,
                file.provider,
                file.status,
                file.path.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}
