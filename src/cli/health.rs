use super::load_app;
use crate::app::AppMode;
use crate::health::health;
use clap::Args;
use std::path::Path;

#[derive(Args)]
pub struct HealthArgs {}

/// Print the health report; fails when any component is down
pub async fn run(_args: HealthArgs, config: &Path) -> anyhow::Result<()> {
    let app = load_app(config, AppMode::Cli).await?;
    let report = health(&app).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_up() {
        anyhow::bail!("health check failed: status is {}", report.status);
    }
    Ok(())
}
