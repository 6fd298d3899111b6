//! PostgreSQL dumps through `pg_dump`.
//!
//! `PGSSLMODE=require` is set when the data source asks for TLS.

use super::{dump_file_path, ensure_tmp_folder, probe_tcp, run_dump_command, Dumper};
use crate::config::PostgresDataSourceConfig;
use crate::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::info;

/// Dumps a PostgreSQL database with `pg_dump`
#[derive(Debug, Clone)]
pub struct PostgresDumper {
    config: PostgresDataSourceConfig,
}

impl PostgresDumper {
    pub fn new(config: PostgresDataSourceConfig) -> Result<Self> {
        ensure_tmp_folder(&config.tmp_folder)?;
        Ok(Self { config })
    }

    /// The `pg_dump` invocation; the password travels in `PGPASSWORD`
    pub fn command(&self) -> Command {
        let binary = self
            .config
            .dump_binary
            .clone()
            .unwrap_or_else(|| PathBuf::from("pg_dump"));
        let mut command = Command::new(binary);
        command
            .arg("--host")
            .arg(&self.config.host)
            .arg("--port")
            .arg(self.config.port.to_string())
            .arg("--username")
            .arg(&self.config.user)
            .arg("--no-password")
            .arg("--dbname")
            .arg(&self.config.db_name)
            .env("PGPASSWORD", &self.config.password);
        if self.config.tls {
            command.env("PGSSLMODE", "require");
        }
        command
    }
}

#[async_trait]
impl Dumper for PostgresDumper {
    fn label(&self) -> &str {
        &self.config.label
    }

    async fn dump(&self) -> Result<PathBuf> {
        let output = dump_file_path(&self.config.tmp_folder, "sql", &self.config.label)?;
        info!(
            "Dumping PostgreSQL database {} ({}:{})",
            self.config.db_name, self.config.host, self.config.port
        );
        run_dump_command(&self.config.label, self.command(), &output).await?;
        Ok(output)
    }

    async fn health(&self) -> Result<()> {
        probe_tcp(&self.config.label, &self.config.host, self.config.port).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;
    use tempfile::TempDir;

    fn config(tls: bool) -> (TempDir, PostgresDataSourceConfig) {
        let dir = TempDir::new().unwrap();
        let config = PostgresDataSourceConfig {
            label: "crm".to_string(),
            tmp_folder: dir.path().to_path_buf(),
            host: "pg.internal".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "pw".to_string(),
            db_name: "crm".to_string(),
            tls,
            dump_binary: None,
        };
        (dir, config)
    }

    fn env<'a>(command: &'a Command, key: &str) -> Option<&'a OsStr> {
        command
            .as_std()
            .get_envs()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v)
    }

    #[test]
    fn test_command_with_tls() {
        let (_dir, config) = config(true);
        let command = PostgresDumper::new(config).unwrap().command();

        assert_eq!(command.as_std().get_program(), "pg_dump");
        let args: Vec<&OsStr> = command.as_std().get_args().collect();
        assert!(args.contains(&OsStr::new("pg.internal")));
        assert!(args.contains(&OsStr::new("crm")));
        assert_eq!(env(&command, "PGPASSWORD"), Some(OsStr::new("pw")));
        assert_eq!(env(&command, "PGSSLMODE"), Some(OsStr::new("require")));
    }

    #[test]
    fn test_command_without_tls() {
        let (_dir, config) = config(false);
        let command = PostgresDumper::new(config).unwrap().command();
        assert_eq!(env(&command, "PGSSLMODE"), None);
    }
}
