//! Health report across the store, notifiers, drives and data sources.

use crate::app::App;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Up => f.write_str("UP"),
            HealthStatus::Down => f.write_str("DOWN"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ComponentStatus {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ComponentStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthReport {
    pub version: String,
    #[serde(rename = "CommitSHA")]
    pub commit_sha: String,
    pub build_date: String,
    pub status: HealthStatus,
    pub details: BTreeMap<String, ComponentStatus>,
}

impl ComponentStatus {
    fn leaf(up: bool) -> Self {
        Self {
            status: if up { HealthStatus::Up } else { HealthStatus::Down },
            components: BTreeMap::new(),
        }
    }

    fn group(components: BTreeMap<String, ComponentStatus>) -> Self {
        let down = components
            .values()
            .any(|c| c.status == HealthStatus::Down);
        Self {
            status: if down { HealthStatus::Down } else { HealthStatus::Up },
            components,
        }
    }
}

impl HealthReport {
    pub fn is_up(&self) -> bool {
        self.status == HealthStatus::Up
    }
}

/// Check every component; any DOWN component makes the report DOWN
pub async fn health(app: &App) -> HealthReport {
    let mut details = BTreeMap::new();

    let database = app.store.health().await;
    if let Err(e) = &database {
        warn!("Database health check failed: {}", e);
    }
    details.insert("Database".to_string(), ComponentStatus::leaf(database.is_ok()));

    let mut notifiers = BTreeMap::new();
    for notifier in &app.notifiers {
        let result = notifier.health().await;
        if let Err(e) = &result {
            warn!("{} health check failed: {}", notifier.name(), e);
        }
        notifiers.insert(notifier.name().to_string(), ComponentStatus::leaf(result.is_ok()));
    }
    details.insert("Notifiers".to_string(), ComponentStatus::group(notifiers));

    let mut drives = BTreeMap::new();
    for drive in &app.drives {
        let result = drive.health().await;
        if let Err(e) = &result {
            warn!("Drive health check failed for {}: {}", drive.label(), e);
        }
        drives.insert(drive.label().to_string(), ComponentStatus::leaf(result.is_ok()));
    }
    details.insert("Drives".to_string(), ComponentStatus::group(drives));

    let mut sources = BTreeMap::new();
    for dumper in &app.dumpers {
        let result = dumper.health().await;
        if let Err(e) = &result {
            warn!("Data source health check failed for {}: {}", dumper.label(), e);
        }
        sources.insert(dumper.label().to_string(), ComponentStatus::leaf(result.is_ok()));
    }
    details.insert("DataSources".to_string(), ComponentStatus::group(sources));

    let down = details.values().any(|c| c.status == HealthStatus::Down);
    HealthReport {
        version: app.version.version.clone(),
        commit_sha: app.version.commit_sha.clone(),
        build_date: app.version.build_date.clone(),
        status: if down { HealthStatus::Down } else { HealthStatus::Up },
        details,
    }
}
