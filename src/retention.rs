//! Retention of old backups.
//!
//! Planning is a pure function of the stored backups, the policy and the
//! current time. Applying a plan deletes the uploaded copies from their drives
//! before removing the records.

use crate::drive::Drive;
use crate::model::{BackupStatus, BackupWithFiles};
use crate::store::BackupStore;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Expire backups older than `days`
    Age { days: u32 },
    /// Keep the newest `keep` backups of each data source
    Count { keep: usize },
}

impl RetentionPolicy {
    /// Creation time before which every backup is expired, for age policies
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            // Past the earliest representable time nothing is old enough
            RetentionPolicy::Age { days } => Some(
                now.checked_sub_signed(Duration::days(i64::from(*days)))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
            ),
            RetentionPolicy::Count { .. } => None,
        }
    }
}

/// Ids of the backups the policy expires, oldest first
pub fn plan(backups: &[BackupWithFiles], policy: RetentionPolicy, now: DateTime<Utc>) -> Vec<Uuid> {
    // Pending backups may still be uploading
    let mut sorted: Vec<&BackupWithFiles> = backups
        .iter()
        .filter(|b| b.backup.status != BackupStatus::Pending)
        .collect();
    sorted.sort_by_key(|b| b.backup.created_at);

    match policy {
        RetentionPolicy::Age { .. } => {
            let cutoff = policy.cutoff(now).unwrap_or(now);
            sorted
                .into_iter()
                .filter(|b| b.backup.created_at < cutoff)
                .map(|b| b.backup.id)
                .collect()
        }
        RetentionPolicy::Count { keep } => {
            let mut by_label: HashMap<&str, Vec<&BackupWithFiles>> = HashMap::new();
            for backup in &sorted {
                by_label
                    .entry(backup.backup.label.as_str())
                    .or_default()
                    .push(*backup);
            }
            let mut expired: Vec<&BackupWithFiles> = by_label
                .into_values()
                .flat_map(|group| {
                    let excess = group.len().saturating_sub(keep);
                    group.into_iter().take(excess)
                })
                .collect();
            expired.sort_by_key(|b| b.backup.created_at);
            expired.into_iter().map(|b| b.backup.id).collect()
        }
    }
}

/// Remove every backup the policy expires.
///
/// Drive copies are deleted first; a drive failure stops the run and leaves
/// the remaining backups for the next one. Returns the removed backup ids.
pub async fn apply(
    store: &dyn BackupStore,
    drives: &[Arc<dyn Drive>],
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>> {
    let candidates = match policy.cutoff(now) {
        Some(cutoff) => store.list_backups_older_than(cutoff).await?,
        None => store.list_backups_with_files().await?,
    };
    let expired = plan(&candidates, policy, now);
    if expired.is_empty() {
        debug!("Retention: nothing to remove");
        return Ok(expired);
    }

    let by_id: HashMap<Uuid, &BackupWithFiles> =
        candidates.iter().map(|b| (b.backup.id, b)).collect();
    let mut removed = Vec::with_capacity(expired.len());
    for id in expired {
        let Some(full) = by_id.get(&id) else {
            continue;
        };
        remove_backup(store, drives, full).await?;
        removed.push(id);
    }

    info!("Retention removed {} backup(s)", removed.len());
    Ok(removed)
}

async fn remove_backup(
    store: &dyn BackupStore,
    drives: &[Arc<dyn Drive>],
    full: &BackupWithFiles,
) -> Result<()> {
    for file in &full.drive_files {
        let drive = drives.iter().find(|d| d.label() == file.label);
        match (drive, file.path.as_deref()) {
            (Some(drive), Some(path)) => {
                drive.delete(path).await.map_err(|e| Error::Retention {
                    reason: format!(
                        "failed to delete {} from drive {}: {}",
                        path, file.label, e
                    ),
                })?;
            }
            (None, Some(path)) => warn!(
                "Drive {} is no longer configured, forgetting {}",
                file.label, path
            ),
            (_, None) => {}
        }
        store.delete_drive_file(file.id).await?;
    }

    if let Some(dump) = full.backup.dump_path.as_deref() {
        match tokio::fs::remove_file(dump).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove dump {}: {}", dump, e),
        }
    }

    store.delete_backup(full.backup.id).await?;
    debug!("Retention removed backup {} ({})", full.backup.id, full.backup.label);
    Ok(())
}
