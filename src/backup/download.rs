use crate::app::App;
use crate::model::DriveFileStatus;
use crate::{Error, Result};
use std::path::Path;
use uuid::Uuid;

/// A backup file ready to be sent to a client
#[derive(Debug, Clone)]
pub struct Download {
    pub filename: String,
    pub mime_type: &'static str,
    pub content: Vec<u8>,
}

/// Read a finished local drive file
pub async fn download(app: &App, drive_file_id: Uuid) -> Result<Download> {
    let file = app.store.get_drive_file(drive_file_id).await?;
    if file.status != DriveFileStatus::Finished {
        return Err(Error::InvalidRequest {
            reason: format!("drive file {} is not finished", drive_file_id),
        });
    }
    if file.provider != "local" {
        return Err(Error::InvalidRequest {
            reason: format!(
                "unexpected drive provider ({}), only local drive files can be downloaded",
                file.provider
            ),
        });
    }
    let path = file.path.as_deref().ok_or_else(|| Error::InvalidRequest {
        reason: format!("drive file {} has no path", drive_file_id),
    })?;

    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::DriveFileNotFound { id: drive_file_id })
        }
        Err(e) => return Err(e.into()),
    };

    let backup = app.store.get_backup(file.backup_id).await?;
    let extension = Path::new(path)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    Ok(Download {
        filename: format!(
            "{}-{}{}",
            backup.label,
            backup.created_at.format("%Y-%m-%d_%H-%M-%S"),
            extension
        ),
        mime_type: "application/octet-stream",
        content,
    })
}

/// Link to the first finished local copy of a backup
pub async fn generate_download_url(app: &App, backup_id: Uuid) -> Result<String> {
    let full = app.store.get_backup_with_files(backup_id).await?;
    let file = full
        .drive_files
        .iter()
        .find(|f| f.provider == "local" && f.status == DriveFileStatus::Finished)
        .ok_or_else(|| Error::InvalidRequest {
            reason: format!("no downloadable drive file for backup {}", backup_id),
        })?;
    Ok(format!(
        "{}/api/backups/{}/download",
        app.app_url.trim_end_matches('/'),
        file.id
    ))
}
