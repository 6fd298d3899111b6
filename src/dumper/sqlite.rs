//! SQLite backups by file copy.

use super::{dump_file_path, ensure_tmp_folder, Dumper};
use crate::config::SqliteDataSourceConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

/// Backs up a SQLite database by copying its file
#[derive(Debug, Clone)]
pub struct SqliteDumper {
    config: SqliteDataSourceConfig,
}

impl SqliteDumper {
    pub fn new(config: SqliteDataSourceConfig) -> Result<Self> {
        ensure_tmp_folder(&config.tmp_folder)?;
        Ok(Self { config })
    }

    fn error(&self, reason: String) -> Error {
        Error::Dump {
            label: self.config.label.clone(),
            reason,
        }
    }
}

#[async_trait]
impl Dumper for SqliteDumper {
    fn label(&self) -> &str {
        &self.config.label
    }

    async fn dump(&self) -> Result<PathBuf> {
        let output = dump_file_path(&self.config.tmp_folder, "db", &self.config.label)?;
        info!("Copying SQLite database {}", self.config.db_path.display());

        fs::copy(&self.config.db_path, &output).await.map_err(|e| {
            self.error(format!(
                "failed to copy {}: {}",
                self.config.db_path.display(),
                e
            ))
        })?;
        let file = fs::File::open(&output).await?;
        file.sync_all().await?;
        Ok(output)
    }

    async fn health(&self) -> Result<()> {
        let metadata = fs::metadata(&self.config.db_path).await.map_err(|e| {
            self.error(format!(
                "database file {} is not accessible: {}",
                self.config.db_path.display(),
                e
            ))
        })?;
        if !metadata.is_file() {
            return Err(self.error(format!(
                "{} is not a file",
                self.config.db_path.display()
            )));
        }
        fs::File::open(&self.config.db_path).await.map_err(|e| {
            self.error(format!("database file is not readable: {}", e))
        })?;
        Ok(())
    }
}
