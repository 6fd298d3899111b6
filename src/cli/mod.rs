//! Command-line interface for Backupman.

use crate::app::{App, AppMode};
use crate::config::AppConfig;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod auth_google;
pub mod health;
pub mod list;
pub mod retry;
pub mod run;
pub mod schedule;
pub mod serve;
pub mod version;

/// Backupman - scheduled database backups to local, S3 and Google Drive storage
#[derive(Parser)]
#[command(name = "backupman")]
#[command(about = "Scheduled database backups with retention and notifications")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "./config.yml")]
    pub config: PathBuf,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Back up every data source once
    Run(run::RunArgs),
    /// Upload a failed backup again
    Retry(retry::RetryArgs),
    /// Start the HTTP API and the scheduled backup job
    Serve(serve::ServeArgs),
    /// List backups and their drive files
    List(list::ListArgs),
    /// Check the database, notifiers, drives and data sources
    Health(health::HealthArgs),
    /// Show the next runs of the scheduled backup job
    Schedule(schedule::ScheduleArgs),
    /// Print version information
    Version(version::VersionArgs),
    /// Authorize Google Drive access and store the token
    AuthGoogle(auth_google::AuthGoogleArgs),
}

pub(crate) fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    AppConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}

pub(crate) async fn load_app(path: &Path, mode: AppMode) -> anyhow::Result<Arc<App>> {
    let config = load_config(path)?;
    let app = App::from_config(&config, mode)
        .await
        .context("failed to initialize application")?;
    Ok(Arc::new(app))
}
