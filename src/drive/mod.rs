//! Storage drives that receive uploaded dumps.

use crate::config::DriveConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use uuid::Uuid;

pub mod google;
pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

pub use google::GoogleDrive;
pub use local::LocalDrive;
#[cfg(feature = "s3")]
pub use s3::S3Drive;

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Provider-specific location, passed back to [`Drive::delete`]
    pub path: String,
    /// Hex SHA-256 of the uploaded content
    pub checksum: String,
}

/// A storage backend for dump files
#[async_trait]
pub trait Drive: Send + Sync {
    fn label(&self) -> &str;

    /// Provider name stored on drive files
    fn provider(&self) -> &'static str;

    async fn upload(&self, file: &Path) -> Result<StoredFile>;

    async fn delete(&self, path: &str) -> Result<()>;

    async fn health(&self) -> Result<()>;
}

/// Build the drive for a configured storage backend
pub async fn from_config(config: &DriveConfig) -> Result<Arc<dyn Drive>> {
    Ok(match config {
        DriveConfig::Local(c) => Arc::new(LocalDrive::new(&c.label, &c.folder)?),
        #[cfg(feature = "s3")]
        DriveConfig::S3(c) => Arc::new(S3Drive::new(c.clone())?),
        #[cfg(not(feature = "s3"))]
        DriveConfig::S3(_) => {
            return Err(Error::FeatureNotAvailable {
                feature: "s3".to_string(),
            })
        }
        DriveConfig::GoogleDrive(c) => Arc::new(GoogleDrive::from_config(c).await?),
    })
}

/// Object name for an upload: `YYYYmmddHHMMSS` plus the source extension
pub fn object_name(source: &Path, at: DateTime<Utc>) -> String {
    let stamp = at.format("%Y%m%d%H%M%S");
    match source.extension() {
        Some(ext) => format!("{}.{}", stamp, ext.to_string_lossy()),
        None => stamp.to_string(),
    }
}

/// Object name with a short random suffix, used on collisions
pub fn suffixed_object_name(source: &Path, at: DateTime<Utc>) -> String {
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    let stamp = at.format("%Y%m%d%H%M%S");
    match source.extension() {
        Some(ext) => format!("{}-{}.{}", stamp, suffix, ext.to_string_lossy()),
        None => format!("{}-{}", stamp, suffix),
    }
}

/// Hex SHA-256 of a file, read in chunks
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub(crate) fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidRequest {
            reason: format!("not a file path: {}", path.display()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_object_name() {
        let at = Utc.with_ymd_and_hms(2025, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(object_name(Path::new("/tmp/x.sql"), at), "20250309070501.sql");
        assert_eq!(object_name(Path::new("/tmp/x"), at), "20250309070501");

        let suffixed = suffixed_object_name(Path::new("/tmp/x.db"), at);
        assert!(suffixed.starts_with("20250309070501-"));
        assert!(suffixed.ends_with(".db"));
        assert_ne!(suffixed, suffixed_object_name(Path::new("/tmp/x.db"), at));
    }

    #[tokio::test]
    async fn test_sha256_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            sha256_file(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
