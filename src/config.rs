//! YAML configuration for Backupman.
//!
//! The file describes the HTTP server, the metadata database, the data sources
//! to dump, the drives to upload to, the notifiers and the retention rule.
//! Boolean switches accept either YAML booleans or the strings `"true"` and
//! `"false"`.

use crate::retention::RetentionPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub data_sources: Vec<DataSourceConfig>,
    #[serde(default)]
    pub drives: Vec<DriveConfig>,
    #[serde(default)]
    pub notifiers: NotifiersConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_app_url")]
    pub app_url: String,
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub backup_job: BackupJobConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupJobConfig {
    #[serde(default, deserialize_with = "flag")]
    pub enabled: bool,
    /// Cron expression with a leading seconds field
    #[serde(default)]
    pub cron: String,
}

/// Where backup and drive-file records are kept
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum DatabaseConfig {
    #[default]
    Memory,
    Sqlite { db_path: PathBuf },
    Mysql(MetadataServerConfig),
    Postgres(MetadataServerConfig),
}

/// Connection settings for a MySQL or Postgres metadata database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataServerConfig {
    pub host: String,
    /// Defaults to the server's standard port
    #[serde(default)]
    pub port: Option<u16>,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub db_name: String,
    #[serde(default, deserialize_with = "flag")]
    pub tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum DataSourceConfig {
    Mysql(MysqlDataSourceConfig),
    Postgres(PostgresDataSourceConfig),
    Sqlite(SqliteDataSourceConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlDataSourceConfig {
    pub label: String,
    #[serde(default = "default_tmp_folder")]
    pub tmp_folder: PathBuf,
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub db_name: String,
    /// Value passed to `--ssl-mode` (e.g. `REQUIRED`)
    #[serde(default)]
    pub tls: Option<String>,
    /// Override for the `mysqldump` executable
    #[serde(default)]
    pub dump_binary: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresDataSourceConfig {
    pub label: String,
    #[serde(default = "default_tmp_folder")]
    pub tmp_folder: PathBuf,
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub db_name: String,
    #[serde(default, deserialize_with = "flag")]
    pub tls: bool,
    /// Override for the `pg_dump` executable
    #[serde(default)]
    pub dump_binary: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteDataSourceConfig {
    pub label: String,
    #[serde(default = "default_tmp_folder")]
    pub tmp_folder: PathBuf,
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum DriveConfig {
    Local(LocalDriveConfig),
    S3(S3DriveConfig),
    GoogleDrive(GoogleDriveConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalDriveConfig {
    pub label: String,
    pub folder: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3DriveConfig {
    pub label: String,
    pub bucket: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Custom endpoint for S3-compatible services
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub force_path_style: bool,
    #[serde(default = "default_true", deserialize_with = "flag")]
    pub integrity_check: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleDriveConfig {
    pub label: String,
    pub folder: String,
    #[serde(default = "default_client_secret_file")]
    pub client_secret_file: PathBuf,
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifiersConfig {
    #[serde(default)]
    pub mail: MailNotifierConfig,
    #[serde(default)]
    pub webhooks: WebhooksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailNotifierConfig {
    #[serde(default, deserialize_with = "flag")]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_user: String,
    #[serde(default)]
    pub smtp_password: String,
    #[serde(default)]
    pub smtp_crypto: SmtpCrypto,
    /// Sender address, defaults to the SMTP user
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub destinations: Vec<MailDestination>,
}

/// Transport security for the SMTP connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpCrypto {
    /// Plain connection
    #[default]
    #[serde(alias = "")]
    None,
    /// Implicit TLS (usually port 465)
    Ssl,
    /// STARTTLS upgrade (usually port 587)
    Tls,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailDestination {
    #[serde(default)]
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhooksConfig {
    #[serde(default, deserialize_with = "flag")]
    pub enabled: bool,
    #[serde(default)]
    pub endpoints: Vec<WebhookEndpointConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpointConfig {
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default, deserialize_with = "flag")]
    pub enabled: bool,
    #[serde(default)]
    pub by: RetentionBy,
    /// Days for `age`, number of backups per data source for `count`
    #[serde(default)]
    pub value: u32,
}

/// Upper bound for age-based retention, roughly a century
pub const MAX_RETENTION_DAYS: u32 = 36_500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionBy {
    #[default]
    Age,
    Count,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            app_url: default_app_url(),
            api_keys: Vec::new(),
            backup_job: BackupJobConfig::default(),
        }
    }
}

impl Default for MailNotifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            smtp_user: String::new(),
            smtp_password: String::new(),
            smtp_crypto: SmtpCrypto::None,
            from: None,
            destinations: Vec::new(),
        }
    }
}

impl DataSourceConfig {
    pub fn label(&self) -> &str {
        match self {
            DataSourceConfig::Mysql(c) => &c.label,
            DataSourceConfig::Postgres(c) => &c.label,
            DataSourceConfig::Sqlite(c) => &c.label,
        }
    }
}

impl DriveConfig {
    pub fn label(&self) -> &str {
        match self {
            DriveConfig::Local(c) => &c.label,
            DriveConfig::S3(c) => &c.label,
            DriveConfig::GoogleDrive(c) => &c.label,
        }
    }
}

impl RetentionConfig {
    /// The active retention policy, if retention is enabled
    pub fn policy(&self) -> Option<RetentionPolicy> {
        if !self.enabled {
            return None;
        }
        Some(match self.by {
            RetentionBy::Age => RetentionPolicy::Age { days: self.value },
            RetentionBy::Count => RetentionPolicy::Count {
                keep: self.value as usize,
            },
        })
    }
}

impl AppConfig {
    /// Load, normalize and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading config from {}", path.display());
        let content = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read file ({}): {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse, normalize and validate a configuration document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: AppConfig = serde_yaml::from_str(content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) {
        for endpoint in &mut self.notifiers.webhooks.endpoints {
            endpoint.token = endpoint.token.trim().to_string();
        }
        if !self.notifiers.webhooks.enabled {
            self.notifiers.webhooks.endpoints.clear();
        }
    }

    /// Validate config settings
    pub fn validate(&self) -> Result<()> {
        if self.data_sources.is_empty() {
            return Err(Error::config("no data sources configured"));
        }
        if self.drives.is_empty() {
            return Err(Error::config("no drives configured"));
        }

        let mut labels = HashSet::new();
        for source in &self.data_sources {
            if source.label().is_empty() {
                return Err(Error::config("data source label cannot be empty"));
            }
            if !labels.insert(source.label()) {
                return Err(Error::config(format!(
                    "duplicate data source label: {}",
                    source.label()
                )));
            }
        }

        let mut labels = HashSet::new();
        for drive in &self.drives {
            if drive.label().is_empty() {
                return Err(Error::config("drive label cannot be empty"));
            }
            if !labels.insert(drive.label()) {
                return Err(Error::config(format!(
                    "duplicate drive label: {}",
                    drive.label()
                )));
            }
        }

        if let DatabaseConfig::Mysql(server) | DatabaseConfig::Postgres(server) = &self.database {
            if server.host.is_empty() || server.db_name.is_empty() {
                return Err(Error::config("database requires host and db_name"));
            }
        }

        if self.http.backup_job.enabled {
            cron::Schedule::from_str(&self.http.backup_job.cron).map_err(|e| {
                Error::config(format!(
                    "invalid backup job cron ({}): {}",
                    self.http.backup_job.cron, e
                ))
            })?;
        }

        if self.retention.enabled {
            if self.retention.value == 0 {
                return Err(Error::config("retention value must be greater than 0"));
            }
            if self.retention.by == RetentionBy::Age && self.retention.value > MAX_RETENTION_DAYS {
                return Err(Error::config(format!(
                    "retention value must be at most {} days",
                    MAX_RETENTION_DAYS
                )));
            }
        }

        let mail = &self.notifiers.mail;
        if mail.enabled {
            if mail.smtp_host.is_empty() {
                return Err(Error::config("mail notifier requires smtp_host"));
            }
            if mail.destinations.is_empty() {
                warn!("Mail notifier is enabled without destinations");
            }
        }

        if self.http.api_keys.iter().any(|key| key.trim().is_empty()) {
            return Err(Error::config("api keys cannot be empty"));
        }

        Ok(())
    }
}

/// Accept `true`/`false` as YAML booleans or strings
fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(true),
            "false" | "no" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected a boolean, got \"{}\"",
                other
            ))),
        },
    }
}

fn default_app_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_tmp_folder() -> PathBuf {
    PathBuf::from("./tmp")
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_smtp_port() -> u16 {
    587
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_client_secret_file() -> PathBuf {
    PathBuf::from("google-client-secret.json")
}

fn default_token_file() -> PathBuf {
    PathBuf::from("google-token.json")
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FULL: &str = r#"
http:
  app_url: https://backup.example.com
  api_keys: ["secret-key"]
  backup_job:
    enabled: "true"
    cron: "0 0 2 * * *"
database:
  provider: sqlite
  db_path: ./backupman.db
data_sources:
  - provider: mysql
    label: shop
    host: db.internal
    user: root
    password: pass
    db_name: shop
    tls: REQUIRED
  - provider: postgres
    label: crm
    host: pg.internal
    user: postgres
    db_name: crm
    tls: true
  - provider: sqlite
    label: local-app
    db_path: ./app.db
drives:
  - provider: local
    label: disk
    folder: ./backups
  - provider: s3
    label: bucket
    bucket: backups
    prefix: nightly
    force_path_style: "true"
  - provider: google_drive
    label: gdrive
    folder: backupman
notifiers:
  mail:
    enabled: "false"
  webhooks:
    enabled: "true"
    endpoints:
      - name: ops
        url: https://hooks.example.com/backup
        token: "  abc123  "
retention:
  enabled: true
  by: count
  value: 7
"#;

    #[test]
    fn test_full_config() {
        let config = AppConfig::from_yaml(FULL).unwrap();

        assert_eq!(config.http.app_url, "https://backup.example.com");
        assert!(config.http.backup_job.enabled);
        assert!(matches!(config.database, DatabaseConfig::Sqlite { .. }));
        assert_eq!(config.data_sources.len(), 3);
        assert_eq!(config.drives.len(), 3);

        match &config.data_sources[0] {
            DataSourceConfig::Mysql(mysql) => {
                assert_eq!(mysql.port, 3306);
                assert_eq!(mysql.tls.as_deref(), Some("REQUIRED"));
                assert_eq!(mysql.tmp_folder, PathBuf::from("./tmp"));
            }
            other => panic!("unexpected data source: {:?}", other),
        }
        match &config.drives[1] {
            DriveConfig::S3(s3) => {
                assert!(s3.force_path_style);
                assert!(s3.integrity_check);
                assert_eq!(s3.region, "us-east-1");
            }
            other => panic!("unexpected drive: {:?}", other),
        }

        assert_eq!(config.notifiers.webhooks.endpoints[0].token, "abc123");
        assert_eq!(
            config.retention.policy(),
            Some(RetentionPolicy::Count { keep: 7 })
        );
    }

    #[test]
    fn test_disabled_webhooks_are_dropped() {
        let yaml = r#"
data_sources:
  - { provider: sqlite, label: app, db_path: ./app.db }
drives:
  - { provider: local, label: disk, folder: ./backups }
notifiers:
  webhooks:
    enabled: false
    endpoints:
      - { url: "https://hooks.example.com" }
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert!(config.notifiers.webhooks.endpoints.is_empty());
        assert!(matches!(config.database, DatabaseConfig::Memory));
        assert_eq!(config.retention.policy(), None);
    }

    #[test]
    fn test_missing_sources_and_drives() {
        let err = AppConfig::from_yaml("drives: []").unwrap_err();
        assert!(err.to_string().contains("no data sources configured"));

        let yaml = r#"
data_sources:
  - { provider: sqlite, label: app, db_path: ./app.db }
"#;
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("no drives configured"));
    }

    #[test]
    fn test_duplicate_drive_labels() {
        let yaml = r#"
data_sources:
  - { provider: sqlite, label: app, db_path: ./app.db }
drives:
  - { provider: local, label: disk, folder: ./a }
  - { provider: local, label: disk, folder: ./b }
"#;
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate drive label: disk"));
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let yaml = r#"
http:
  backup_job: { enabled: true, cron: "every night" }
data_sources:
  - { provider: sqlite, label: app, db_path: ./app.db }
drives:
  - { provider: local, label: disk, folder: ./backups }
"#;
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("invalid backup job cron"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let yaml = r#"
data_sources:
  - { provider: oracle, label: app }
drives:
  - { provider: local, label: disk, folder: ./backups }
"#;
        assert!(matches!(
            AppConfig::from_yaml(yaml),
            Err(Error::YamlParse(_))
        ));
    }

    #[test]
    fn test_zero_retention_rejected() {
        let yaml = r#"
data_sources:
  - { provider: sqlite, label: app, db_path: ./app.db }
drives:
  - { provider: local, label: disk, folder: ./backups }
retention: { enabled: "true", by: age, value: 0 }
"#;
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("retention value"));
    }

    #[test]
    fn test_huge_retention_age_rejected() {
        let yaml = r#"
data_sources:
  - { provider: sqlite, label: app, db_path: ./app.db }
drives:
  - { provider: local, label: disk, folder: ./backups }
retention: { enabled: true, by: age, value: 4000000000 }
"#;
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("at most 36500 days"));

        // counts have no calendar limit
        let config = AppConfig::from_yaml(&yaml.replace("by: age", "by: count")).unwrap();
        assert!(matches!(
            config.retention.policy(),
            Some(RetentionPolicy::Count { .. })
        ));
    }

    #[test]
    fn test_server_metadata_databases() {
        let yaml = r#"
database:
  provider: postgres
  host: meta.internal
  user: backupman
  password: secret
  db_name: backupman
  tls: "true"
data_sources:
  - { provider: sqlite, label: app, db_path: ./app.db }
drives:
  - { provider: local, label: disk, folder: ./backups }
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        match &config.database {
            DatabaseConfig::Postgres(server) => {
                assert_eq!(server.host, "meta.internal");
                assert_eq!(server.port, None);
                assert!(server.tls);
            }
            other => panic!("unexpected database: {:?}", other),
        }

        let config = AppConfig::from_yaml(&yaml.replace("postgres", "mysql")).unwrap();
        assert!(matches!(config.database, DatabaseConfig::Mysql(_)));

        let err = AppConfig::from_yaml(&yaml.replace("db_name: backupman", "db_name: \"\""))
            .unwrap_err();
        assert!(err.to_string().contains("host and db_name"));
    }
}
