//! Application wiring: the store, dumpers, drives and notifiers one process
//! works with.

use crate::config::{AppConfig, DatabaseConfig};
use crate::drive::{self, Drive};
use crate::dumper::{self, Dumper};
use crate::notifier::{self, Notifier};
use crate::retention::RetentionPolicy;
#[cfg(feature = "mysql")]
use crate::store::MysqlStore;
#[cfg(feature = "postgres")]
use crate::store::PostgresStore;
use crate::store::{BackupStore, MemoryStore, SqliteStore};
use crate::Result;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// How background work is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// One-shot command: everything runs to completion in order
    Cli,
    /// Long-running server: follow-up work runs in spawned tasks
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionInfo {
    pub version: String,
    #[serde(rename = "CommitSHA")]
    pub commit_sha: String,
    pub build_date: String,
}

impl VersionInfo {
    /// Version of this build
    pub fn current() -> Self {
        Self {
            version: crate::VERSION.to_string(),
            commit_sha: option_env!("BACKUPMAN_COMMIT_SHA")
                .unwrap_or("none")
                .to_string(),
            build_date: option_env!("BACKUPMAN_BUILD_DATE")
                .unwrap_or("unknown")
                .to_string(),
        }
    }
}

pub struct App {
    pub mode: AppMode,
    pub version: VersionInfo,
    /// Public base URL used to build download links
    pub app_url: String,
    pub api_keys: Vec<String>,
    pub store: Arc<dyn BackupStore>,
    pub dumpers: Vec<Arc<dyn Dumper>>,
    pub drives: Vec<Arc<dyn Drive>>,
    pub notifiers: Vec<Arc<dyn Notifier>>,
    pub retention: Option<RetentionPolicy>,
}

impl App {
    /// Bare application around a store; add components with the `with_*` methods
    pub fn new(store: Arc<dyn BackupStore>) -> Self {
        Self {
            mode: AppMode::Cli,
            version: VersionInfo::current(),
            app_url: "http://localhost:8080".to_string(),
            api_keys: Vec::new(),
            store,
            dumpers: Vec::new(),
            drives: Vec::new(),
            notifiers: Vec::new(),
            retention: None,
        }
    }

    /// Build every component described by the configuration
    pub async fn from_config(config: &AppConfig, mode: AppMode) -> Result<Self> {
        let store: Arc<dyn BackupStore> = match &config.database {
            DatabaseConfig::Memory => Arc::new(MemoryStore::new()),
            DatabaseConfig::Sqlite { db_path } => Arc::new(SqliteStore::open(db_path).await?),
            #[cfg(feature = "mysql")]
            DatabaseConfig::Mysql(server) => Arc::new(MysqlStore::connect(server).await?),
            #[cfg(not(feature = "mysql"))]
            DatabaseConfig::Mysql(_) => {
                return Err(crate::Error::FeatureNotAvailable {
                    feature: "mysql".to_string(),
                })
            }
            #[cfg(feature = "postgres")]
            DatabaseConfig::Postgres(server) => Arc::new(PostgresStore::connect(server).await?),
            #[cfg(not(feature = "postgres"))]
            DatabaseConfig::Postgres(_) => {
                return Err(crate::Error::FeatureNotAvailable {
                    feature: "postgres".to_string(),
                })
            }
        };

        let dumpers = config
            .data_sources
            .iter()
            .map(dumper::from_config)
            .collect::<Result<Vec<_>>>()?;
        let mut drives = Vec::with_capacity(config.drives.len());
        for drive_config in &config.drives {
            drives.push(drive::from_config(drive_config).await?);
        }
        let notifiers = notifier::from_config(&config.notifiers)?;

        info!(
            "Loaded {} data source(s), {} drive(s), {} notifier(s)",
            dumpers.len(),
            drives.len(),
            notifiers.len()
        );

        Ok(Self {
            mode,
            version: VersionInfo::current(),
            app_url: config.http.app_url.trim_end_matches('/').to_string(),
            api_keys: config.http.api_keys.clone(),
            store,
            dumpers,
            drives,
            notifiers,
            retention: config.retention.policy(),
        })
    }

    pub fn with_mode(mut self, mode: AppMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_app_url(mut self, app_url: &str) -> Self {
        self.app_url = app_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_keys(mut self, api_keys: Vec<String>) -> Self {
        self.api_keys = api_keys;
        self
    }

    pub fn with_dumper(mut self, dumper: Arc<dyn Dumper>) -> Self {
        self.dumpers.push(dumper);
        self
    }

    pub fn with_drive(mut self, drive: Arc<dyn Drive>) -> Self {
        self.drives.push(drive);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn with_retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention = Some(policy);
        self
    }

    pub fn drive(&self, label: &str) -> Option<&Arc<dyn Drive>> {
        self.drives.iter().find(|d| d.label() == label)
    }

    /// Run `task` inline in CLI mode, or in a background task in server mode
    pub(crate) async fn run_or_spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.mode {
            AppMode::Cli => task.await,
            AppMode::Server => {
                tokio::spawn(task);
            }
        }
    }
}
