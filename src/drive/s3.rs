//! S3 and S3-compatible object storage.

use super::{file_name, object_name, sha256_file, Drive, StoredFile};
use crate::config::S3DriveConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

const MD5_METADATA: &str = "local-md5";
const SHA256_METADATA: &str = "local-sha256";

pub struct S3Drive {
    client: Client,
    config: S3DriveConfig,
}

impl S3Drive {
    pub fn new(config: S3DriveConfig) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(Error::config(format!(
                "S3 drive {} requires a bucket",
                config.label
            )));
        }
        let access_key = config
            .access_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok());
        let secret_key = config
            .secret_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok());
        let (Some(access_key), Some(secret_key)) = (access_key, secret_key) else {
            return Err(Error::config(format!(
                "S3 drive {} requires access_key and secret_key",
                config.label
            )));
        };

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "backupman",
            ))
            .force_path_style(config.force_path_style);
        if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            config,
        })
    }

    fn key(&self, name: &str) -> String {
        object_key(self.config.prefix.as_deref(), name)
    }

    fn error(&self, reason: impl ToString) -> Error {
        Error::drive(&self.config.label, reason)
    }

    async fn exists(&self, key: &str) -> bool {
        self.client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .is_ok()
    }

    async fn verify(&self, key: &str, md5: &str, sha256: &str) -> Result<()> {
        let head = self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.error(format!("HEAD {} failed: {}", key, e)))?;
        verify_integrity(head.e_tag(), head.metadata(), md5, sha256)
    }
}

/// Join an optional prefix and an object name
fn object_key(prefix: Option<&str>, name: &str) -> String {
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}/{}", prefix, name),
        None => name.to_string(),
    }
}

/// Check a HEAD response against the local digests.
///
/// Multipart ETags (containing `-`) are not an MD5 and only the metadata is
/// checked for them.
pub(crate) fn verify_integrity(
    etag: Option<&str>,
    metadata: Option<&HashMap<String, String>>,
    md5: &str,
    sha256: &str,
) -> Result<()> {
    let mismatch = |reason: String| Error::IntegrityError { reason };

    if let Some(etag) = etag.map(|e| e.trim_matches('"')) {
        if !etag.contains('-') && !etag.eq_ignore_ascii_case(md5) {
            return Err(mismatch(format!(
                "ETag {} does not match local MD5 {}",
                etag, md5
            )));
        }
    }

    let metadata = metadata.ok_or_else(|| mismatch("object has no metadata".to_string()))?;
    for (key, expected) in [(MD5_METADATA, md5), (SHA256_METADATA, sha256)] {
        match metadata.get(key) {
            Some(value) if value.eq_ignore_ascii_case(expected) => {}
            Some(value) => {
                return Err(mismatch(format!(
                    "metadata {} is {}, expected {}",
                    key, value, expected
                )))
            }
            None => return Err(mismatch(format!("metadata {} is missing", key))),
        }
    }
    Ok(())
}

async fn md5_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }
    Ok(format!("{:x}", context.compute()))
}

#[async_trait]
impl Drive for S3Drive {
    fn label(&self) -> &str {
        &self.config.label
    }

    fn provider(&self) -> &'static str {
        "s3"
    }

    async fn upload(&self, file: &Path) -> Result<StoredFile> {
        let now = Utc::now();
        let mut key = self.key(&object_name(file, now));
        if self.exists(&key).await {
            key = self.key(&super::suffixed_object_name(file, now));
        }

        let checksum = sha256_file(file).await?;
        let body = ByteStream::from_path(file)
            .await
            .map_err(|e| self.error(format!("cannot read {}: {}", file.display(), e)))?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .body(body)
            .content_type("application/octet-stream");
        let md5 = if self.config.integrity_check {
            let md5 = md5_file(file).await?;
            request = request
                .metadata(MD5_METADATA, &md5)
                .metadata(SHA256_METADATA, &checksum);
            Some(md5)
        } else {
            None
        };

        request
            .send()
            .await
            .map_err(|e| self.error(format!("upload of {} failed: {}", key, e)))?;
        debug!(
            "Uploaded {} to s3://{}/{}",
            file_name(file)?,
            self.config.bucket,
            key
        );

        if let Some(md5) = md5 {
            if let Err(e) = self.verify(&key, &md5, &checksum).await {
                warn!("Integrity check of {} failed, removing object: {}", key, e);
                if let Err(delete_err) = self.delete(&key).await {
                    warn!("Failed to remove corrupt object {}: {}", key, delete_err);
                }
                return Err(e);
            }
        }

        Ok(StoredFile {
            path: key,
            checksum,
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| self.error(format!("delete of {} failed: {}", path, e)))?;
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        let key = self.key(".backupman-health");
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .body(ByteStream::from_static(b"backupman health probe"))
            .send()
            .await
            .map_err(|e| self.error(format!("probe upload failed: {}", e)))?;
        self.delete(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(md5: &str, sha256: &str) -> HashMap<String, String> {
        HashMap::from([
            (MD5_METADATA.to_string(), md5.to_string()),
            (SHA256_METADATA.to_string(), sha256.to_string()),
        ])
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key(None, "a.sql"), "a.sql");
        assert_eq!(object_key(Some(""), "a.sql"), "a.sql");
        assert_eq!(object_key(Some("/nightly/"), "a.sql"), "nightly/a.sql");
    }

    #[test]
    fn test_verify_single_part() {
        let meta = metadata("900150983cd24fb0d6963f7d28e17f72", "ba78");
        verify_integrity(
            Some("\"900150983cd24fb0d6963f7d28e17f72\""),
            Some(&meta),
            "900150983cd24fb0d6963f7d28e17f72",
            "ba78",
        )
        .unwrap();

        let err = verify_integrity(
            Some("\"deadbeef\""),
            Some(&meta),
            "900150983cd24fb0d6963f7d28e17f72",
            "ba78",
        )
        .unwrap_err();
        assert!(matches!(err, Error::IntegrityError { .. }));
    }

    #[test]
    fn test_verify_multipart_uses_metadata() {
        let meta = metadata("abc", "def");
        verify_integrity(Some("\"0123-4\""), Some(&meta), "abc", "def").unwrap();
        assert!(verify_integrity(Some("\"0123-4\""), Some(&meta), "abc", "other").is_err());
        assert!(verify_integrity(Some("\"0123-4\""), None, "abc", "def").is_err());
    }

    #[test]
    fn test_missing_credentials() {
        if std::env::var("AWS_ACCESS_KEY_ID").is_ok() {
            return;
        }
        let err = S3Drive::new(S3DriveConfig {
            label: "bucket".to_string(),
            bucket: "backups".to_string(),
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            endpoint: None,
            prefix: None,
            force_path_style: false,
            integrity_check: true,
        })
        .err()
        .unwrap();
        assert!(err.to_string().contains("requires access_key"));
    }
}
