//! MySQL dumps through `mysqldump`.

use super::{dump_file_path, ensure_tmp_folder, probe_tcp, run_dump_command, Dumper};
use crate::config::MysqlDataSourceConfig;
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// Dumps a MySQL database with `mysqldump`
#[derive(Debug, Clone)]
pub struct MysqlDumper {
    config: MysqlDataSourceConfig,
}

impl MysqlDumper {
    pub fn new(config: MysqlDataSourceConfig) -> Result<Self> {
        ensure_tmp_folder(&config.tmp_folder)?;
        Ok(Self { config })
    }

    pub fn tmp_folder(&self) -> &Path {
        &self.config.tmp_folder
    }

    /// The `mysqldump` invocation; the password travels in `MYSQL_PWD`
    pub fn command(&self) -> Command {
        let binary = self
            .config
            .dump_binary
            .clone()
            .unwrap_or_else(|| PathBuf::from("mysqldump"));
        let mut command = Command::new(binary);
        command
            .arg("--host")
            .arg(&self.config.host)
            .arg("--port")
            .arg(self.config.port.to_string())
            .arg("--user")
            .arg(&self.config.user)
            .arg("--single-transaction")
            .arg("--routines")
            .arg("--triggers");
        if let Some(mode) = self.config.tls.as_deref().filter(|m| !m.is_empty()) {
            command.arg(format!("--ssl-mode={}", mode));
        }
        command
            .arg(&self.config.db_name)
            .env("MYSQL_PWD", &self.config.password);
        command
    }
}

#[async_trait]
impl Dumper for MysqlDumper {
    fn label(&self) -> &str {
        &self.config.label
    }

    async fn dump(&self) -> Result<PathBuf> {
        let output = dump_file_path(&self.config.tmp_folder, "sql", &self.config.label)?;
        info!(
            "Dumping MySQL database {} ({}:{})",
            self.config.db_name, self.config.host, self.config.port
        );
        run_dump_command(&self.config.label, self.command(), &output).await?;
        Ok(output)
    }

    async fn health(&self) -> Result<()> {
        probe_tcp(&self.config.label, &self.config.host, self.config.port).await
    }
}
