use super::{load_app, load_config};
use crate::app::{App, AppMode};
use crate::http;
use anyhow::Context;
use clap::Args;
use std::path::Path;
use std::sync::Arc;

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    pub port: u16,
}

pub async fn run(args: ServeArgs, config: &Path) -> anyhow::Result<()> {
    let settings = load_config(config)?;
    let app: Arc<App> = load_app(config, AppMode::Server).await?;
    let backup_job = settings
        .http
        .backup_job
        .enabled
        .then_some(settings.http.backup_job.cron.as_str());

    http::serve(app, args.port, backup_job)
        .await
        .context("server failed")
}
