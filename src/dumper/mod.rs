//! Dump executors producing local dump files from data sources.
//!
//! MySQL and PostgreSQL dumps go through the vendor dump tools, SQLite
//! databases are copied. Every dump lands in the dumper's `tmp_folder` as
//! `<uuid>.<ext>`.

use crate::config::DataSourceConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use mysql::MysqlDumper;
pub use postgres::PostgresDumper;
pub use sqlite::SqliteDumper;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// A data source that can be dumped to a local file
#[async_trait]
pub trait Dumper: Send + Sync {
    /// Label of the data source
    fn label(&self) -> &str;

    /// Dump the data source and return the path of the dump file
    async fn dump(&self) -> Result<PathBuf>;

    async fn health(&self) -> Result<()>;
}

/// Build the dumper for a configured data source
pub fn from_config(config: &DataSourceConfig) -> Result<Arc<dyn Dumper>> {
    Ok(match config {
        DataSourceConfig::Mysql(c) => Arc::new(MysqlDumper::new(c.clone())?),
        DataSourceConfig::Postgres(c) => Arc::new(PostgresDumper::new(c.clone())?),
        DataSourceConfig::Sqlite(c) => Arc::new(SqliteDumper::new(c.clone())?),
    })
}

/// Reserve a fresh `<uuid>.<ext>` path in `folder`
pub(crate) fn dump_file_path(folder: &Path, ext: &str, label: &str) -> Result<PathBuf> {
    let path = folder.join(format!("{}.{}", Uuid::new_v4(), ext));
    if path.exists() {
        return Err(Error::Dump {
            label: label.to_string(),
            reason: format!("dump file already exists: {}", path.display()),
        });
    }
    Ok(path)
}

pub(crate) fn ensure_tmp_folder(folder: &Path) -> Result<()> {
    std::fs::create_dir_all(folder).map_err(|e| {
        Error::config(format!(
            "failed to create tmp folder ({}): {}",
            folder.display(),
            e
        ))
    })
}

/// Run a dump command, streaming its stdout into `output`.
///
/// A non-zero exit removes the partial file and reports stderr.
pub(crate) async fn run_dump_command(
    label: &str,
    mut command: Command,
    output: &Path,
) -> Result<()> {
    let dump_error = |reason: String| Error::Dump {
        label: label.to_string(),
        reason,
    };

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| dump_error(format!("failed to start dump command: {}", e)))?;
    let mut file = tokio::fs::File::create(output).await?;

    let mut stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut buffer = String::new();
        if let Some(stderr) = stderr.as_mut() {
            let _ = stderr.read_to_string(&mut buffer).await;
        }
        buffer
    });

    let copied = match child.stdout.take() {
        Some(mut stdout) => tokio::io::copy(&mut stdout, &mut file).await,
        None => Ok(0),
    };
    let status = child.wait().await?;
    let stderr = stderr_task.await.unwrap_or_default();

    let failure = match (copied, status.success()) {
        (Ok(bytes), true) => {
            file.sync_all().await?;
            debug!("Dumped {} bytes for {} to {}", bytes, label, output.display());
            return Ok(());
        }
        (Err(e), _) => format!("failed to write dump: {}", e),
        (Ok(_), false) => format!("{}: {}", status, stderr.trim()),
    };

    drop(file);
    if let Err(e) = tokio::fs::remove_file(output).await {
        warn!("Failed to remove partial dump {}: {}", output.display(), e);
    }
    Err(dump_error(failure))
}

/// Check that `host:port` accepts TCP connections
pub(crate) async fn probe_tcp(label: &str, host: &str, port: u16) -> Result<()> {
    let unreachable = |reason: String| Error::Dump {
        label: label.to_string(),
        reason,
    };
    match tokio::time::timeout(HEALTH_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(unreachable(format!(
            "cannot reach {}:{}: {}",
            host, port, e
        ))),
        Err(_) => Err(unreachable(format!(
            "timed out connecting to {}:{}",
            host, port
        ))),
    }
}
