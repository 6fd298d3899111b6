//! # Backupman
//!
//! Scheduled database backups shipped to one or more storage drives.
//!
//! ## Features
//!
//! - **Dumpers**: MySQL and PostgreSQL through their vendor dump tools, SQLite by file copy
//! - **Drives**: local folders, S3-compatible buckets with integrity checks, Google Drive
//! - **Metadata store**: in-memory or SQLite, tracking every backup and its drive copies
//! - **Notifications**: HTML mail reports and JSON webhooks after each backup
//! - **Retention**: age or count based cleanup of old backups across all drives
//! - **Server mode**: cron-scheduled runs plus an HTTP API for listing, downloads and health
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use backupman::app::{App, AppMode};
//! use backupman::backup::run_backup;
//! use backupman::config::AppConfig;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = AppConfig::load(Path::new("./config.yml"))?;
//! let app = Arc::new(App::from_config(&config, AppMode::Cli).await?);
//!
//! for id in run_backup(&app).await? {
//!     println!("Backup created: {}", id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod backup;
pub mod cli;
pub mod config;
pub mod drive;
pub mod dumper;
pub mod error;
pub mod health;
pub mod http;
pub mod logging;
pub mod model;
pub mod notifier;
pub mod retention;
pub mod scheduler;
pub mod store;

#[doc(hidden)]
pub mod testing;

pub use app::{App, AppMode};
pub use error::{Error, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
