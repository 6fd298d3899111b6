//! Drive backed by a local (or mounted) folder.

use super::{object_name, sha256_file, suffixed_object_name, Drive, StoredFile};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const PROBE_CONTENT: &[u8] = b"backupman health probe";

#[derive(Debug, Clone)]
pub struct LocalDrive {
    label: String,
    folder: PathBuf,
}

impl LocalDrive {
    pub fn new(label: &str, folder: &Path) -> Result<Self> {
        std::fs::create_dir_all(folder).map_err(|e| {
            Error::config(format!(
                "failed to create drive folder ({}): {}",
                folder.display(),
                e
            ))
        })?;
        Ok(Self {
            label: label.to_string(),
            folder: folder.to_path_buf(),
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }
}

#[async_trait]
impl Drive for LocalDrive {
    fn label(&self) -> &str {
        &self.label
    }

    fn provider(&self) -> &'static str {
        "local"
    }

    async fn upload(&self, file: &Path) -> Result<StoredFile> {
        let now = Utc::now();
        let mut destination = self.folder.join(object_name(file, now));
        if fs::try_exists(&destination).await? {
            destination = self.folder.join(suffixed_object_name(file, now));
        }

        fs::copy(file, &destination)
            .await
            .map_err(|e| Error::drive(&self.label, format!("copy failed: {}", e)))?;
        fs::File::open(&destination).await?.sync_all().await?;
        let checksum = sha256_file(&destination).await?;

        debug!("Stored {} at {}", file.display(), destination.display());
        Ok(StoredFile {
            path: destination.to_string_lossy().into_owned(),
            checksum,
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("File {} already removed from drive {}", path, self.label);
                Ok(())
            }
            Err(e) => Err(Error::drive(&self.label, e)),
        }
    }

    async fn health(&self) -> Result<()> {
        let probe = self.folder.join(".backupman-health");
        fs::write(&probe, PROBE_CONTENT)
            .await
            .map_err(|e| Error::drive(&self.label, format!("folder not writable: {}", e)))?;
        let content = fs::read(&probe).await;
        fs::remove_file(&probe).await?;
        if content? != PROBE_CONTENT {
            return Err(Error::drive(&self.label, "probe file content mismatch"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_and_delete() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("dump.sql");
        std::fs::write(&source, b"abc").unwrap();
        let drive = LocalDrive::new("disk", &dir.path().join("drive")).unwrap();

        let stored = drive.upload(&source).await.unwrap();
        assert!(stored.path.ends_with(".sql"));
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"abc");
        assert_eq!(
            stored.checksum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        drive.delete(&stored.path).await.unwrap();
        assert!(!Path::new(&stored.path).exists());
        drive.delete(&stored.path).await.unwrap();
    }

    #[tokio::test]
    async fn test_same_second_uploads_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("dump.sql");
        std::fs::write(&source, b"abc").unwrap();
        let drive = LocalDrive::new("disk", &dir.path().join("drive")).unwrap();

        let first = drive.upload(&source).await.unwrap();
        let second = drive.upload(&source).await.unwrap();
        assert_ne!(first.path, second.path);
        assert!(Path::new(&first.path).exists());
        assert!(Path::new(&second.path).exists());
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let drive = LocalDrive::new("disk", dir.path()).unwrap();
        drive.health().await.unwrap();
        assert!(!dir.path().join(".backupman-health").exists());
    }
}
