//! Backup service: dump every data source, ship the dumps to every drive and
//! settle the outcome.

use crate::app::App;
use crate::drive::Drive;
use crate::model::{
    resolve_status, Backup, BackupStatus, BackupWithFiles, DriveFile, DriveFileStatus,
    NewBackup, NewDriveFile,
};
use crate::{retention, Error, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod download;

pub use download::{download, generate_download_url, Download};

/// Back up every data source once and return the created backup ids.
///
/// A failed dump or upload is recorded on the backup and the run goes on;
/// only failing to create a backup record aborts it.
pub async fn run_backup(app: &Arc<App>) -> Result<Vec<Uuid>> {
    let mut ids = Vec::with_capacity(app.dumpers.len());

    for dumper in &app.dumpers {
        let mut backup = app
            .store
            .create_backup(NewBackup {
                label: dumper.label().to_string(),
                status: BackupStatus::Pending,
            })
            .await?;
        ids.push(backup.id);
        info!("Backing up {} ({})", dumper.label(), backup.id);

        let dump = match dumper.dump().await {
            Ok(dump) => dump,
            Err(e) => {
                error!("Failed to dump database ({}): {}", dumper.label(), e);
                backup.status = BackupStatus::Failed;
                if let Err(e) = app.store.update_backup(&backup).await {
                    error!("Failed to mark backup {} as failed: {}", backup.id, e);
                }
                continue;
            }
        };

        backup.dump_path = Some(dump.to_string_lossy().into_owned());
        if let Err(e) = app.store.update_backup(&backup).await {
            error!(
                "Failed to record dump {} for backup {}: {}",
                dump.display(),
                backup.id,
                e
            );
            continue;
        }

        for drive in &app.drives {
            let file = match app
                .store
                .create_drive_file(NewDriveFile {
                    backup_id: backup.id,
                    provider: drive.provider().to_string(),
                    label: drive.label().to_string(),
                    status: DriveFileStatus::Pending,
                })
                .await
            {
                Ok(file) => file,
                Err(e) => {
                    error!(
                        "Failed to create drive file ({}) for {}: {}",
                        drive.label(),
                        dumper.label(),
                        e
                    );
                    continue;
                }
            };
            upload(app, drive.as_ref(), file, &dump).await;
        }

        if let Err(e) = after_backup(app, backup.id).await {
            error!("After-backup tasks failed for {}: {}", backup.id, e);
        }
    }

    if let Some(policy) = app.retention {
        let task_app = Arc::clone(app);
        app.run_or_spawn(async move {
            if let Err(e) =
                retention::apply(task_app.store.as_ref(), &task_app.drives, policy, Utc::now())
                    .await
            {
                error!("Retention failed: {}", e);
            }
        })
        .await;
    }

    Ok(ids)
}

/// Upload a dump for one drive file and record the outcome
async fn upload(app: &App, drive: &dyn Drive, mut file: DriveFile, dump: &Path) -> DriveFile {
    match drive.upload(dump).await {
        Ok(stored) => {
            info!(
                "Uploaded {} to {} (sha256 {})",
                dump.display(),
                drive.label(),
                stored.checksum
            );
            file.status = DriveFileStatus::Finished;
            file.path = Some(stored.path);
        }
        Err(e) => {
            error!(
                "Failed to upload {} to drive {}: {}",
                dump.display(),
                drive.label(),
                e
            );
            file.status = DriveFileStatus::Failed;
        }
    }

    match app.store.update_drive_file(&file).await {
        Ok(updated) => updated,
        Err(e) => {
            error!("Failed to update drive file {}: {}", file.id, e);
            file
        }
    }
}

/// Settle a backup once its uploads are done.
///
/// The status is derived from the drive files. A finished backup loses its
/// local dump. Every notifier then gets the report. A backup that was
/// already finished is returned unchanged.
pub async fn after_backup(app: &Arc<App>, id: Uuid) -> Result<Backup> {
    let full = app.store.get_backup_with_files(id).await?;
    if full.backup.status == BackupStatus::Finished {
        return Ok(full.backup);
    }

    let mut backup = full.backup;
    backup.status = resolve_status(&full.drive_files);
    let backup = app.store.update_backup(&backup).await?;

    if backup.status == BackupStatus::Finished {
        let task_app = Arc::clone(app);
        let finished = backup.clone();
        app.run_or_spawn(async move {
            if let Err(e) = remove_dump(&task_app, finished).await {
                error!("Failed to remove dump: {}", e);
            }
        })
        .await;
    }

    for notifier in &app.notifiers {
        let notifier = Arc::clone(notifier);
        let task_app = Arc::clone(app);
        app.run_or_spawn(async move {
            let report = match task_app.store.get_backup_with_files(id).await {
                Ok(report) => report,
                Err(e) => {
                    error!("Failed to load backup {} for notification: {}", id, e);
                    return;
                }
            };
            if let Err(e) = notifier.backup_report(&report).await {
                error!("Failed to send backup report ({}): {}", notifier.name(), e);
            }
        })
        .await;
    }

    Ok(backup)
}

/// Delete the local dump of a backup and clear its path
async fn remove_dump(app: &App, mut backup: Backup) -> Result<()> {
    let Some(dump) = backup.dump_path.take() else {
        return Ok(());
    };
    match tokio::fs::remove_file(&dump).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Dump file for backup {} does not exist: {}", backup.id, dump);
        }
        Err(e) => return Err(e.into()),
    }
    app.store.update_backup(&backup).await?;
    Ok(())
}

/// Upload a failed backup again to the drives it failed on
pub async fn retry_backup(app: &Arc<App>, id: Uuid) -> Result<Backup> {
    let full = app.store.get_backup_with_files(id).await?;
    if full.backup.status != BackupStatus::Failed {
        return Err(Error::InvalidRequest {
            reason: format!(
                "backup {} is {}, only failed backups can be retried",
                id, full.backup.status
            ),
        });
    }
    let dump = full
        .backup
        .dump_path
        .clone()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::InvalidRequest {
            reason: format!("backup {} has no dump to retry", id),
        })?;
    let dump = Path::new(&dump);

    for file in full
        .drive_files
        .into_iter()
        .filter(|f| f.status == DriveFileStatus::Failed)
    {
        let Some(drive) = app.drive(&file.label) else {
            warn!(
                "Drive {} is no longer configured, skipping drive file {}",
                file.label, file.id
            );
            continue;
        };
        let mut pending = file;
        pending.status = DriveFileStatus::Pending;
        let pending = match app.store.update_drive_file(&pending).await {
            Ok(pending) => pending,
            Err(e) => {
                error!("Failed to mark drive file {} pending: {}", pending.id, e);
                continue;
            }
        };
        upload(app, drive.as_ref(), pending, dump).await;
    }

    after_backup(app, id).await
}

/// Every backup with its drive files, newest first
pub async fn list_backups(app: &App) -> Result<Vec<BackupWithFiles>> {
    app.store.list_backups_with_files().await
}
