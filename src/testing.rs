//! In-process test doubles for dumpers, drives and notifiers.

use crate::app::App;
use crate::drive::{suffixed_object_name, Drive, StoredFile};
use crate::dumper::Dumper;
use crate::model::BackupWithFiles;
use crate::notifier::Notifier;
use crate::store::MemoryStore;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// App in CLI mode with an in-memory store and nothing else
pub fn mock_app() -> App {
    App::new(Arc::new(MemoryStore::new()))
}

/// Writes a small fake dump into a folder
pub struct MockDumper {
    label: String,
    folder: PathBuf,
    failing: AtomicBool,
    dumps: AtomicUsize,
}

impl MockDumper {
    pub fn new(label: &str, folder: &Path) -> Self {
        Self {
            label: label.to_string(),
            folder: folder.to_path_buf(),
            failing: AtomicBool::new(false),
            dumps: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn dump_count(&self) -> usize {
        self.dumps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dumper for MockDumper {
    fn label(&self) -> &str {
        &self.label
    }

    async fn dump(&self) -> Result<PathBuf> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Dump {
                label: self.label.clone(),
                reason: "mock dump failure".to_string(),
            });
        }
        tokio::fs::create_dir_all(&self.folder).await?;
        let path = self.folder.join(format!("{}.sql", Uuid::new_v4()));
        tokio::fs::write(&path, format!("-- dump of {}\n", self.label)).await?;
        self.dumps.fetch_add(1, Ordering::SeqCst);
        Ok(path)
    }

    async fn health(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Dump {
                label: self.label.clone(),
                reason: "mock source down".to_string(),
            });
        }
        Ok(())
    }
}

/// Keeps uploaded object names in memory
pub struct MockDrive {
    label: String,
    failing: AtomicBool,
    objects: Mutex<Vec<String>>,
}

impl MockDrive {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            failing: AtomicBool::new(false),
            objects: Mutex::new(Vec::new()),
        }
    }

    /// Make uploads, deletes and health checks fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn objects(&self) -> Vec<String> {
        self.objects.lock().map(|o| o.clone()).unwrap_or_default()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::drive(&self.label, "mock drive failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Drive for MockDrive {
    fn label(&self) -> &str {
        &self.label
    }

    fn provider(&self) -> &'static str {
        "mock"
    }

    async fn upload(&self, file: &Path) -> Result<StoredFile> {
        self.check()?;
        let content = tokio::fs::read(file).await?;
        let path = format!("{}/{}", self.label, suffixed_object_name(file, Utc::now()));
        if let Ok(mut objects) = self.objects.lock() {
            objects.push(path.clone());
        }
        Ok(StoredFile {
            path,
            checksum: hex::encode(Sha256::digest(&content)),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check()?;
        if let Ok(mut objects) = self.objects.lock() {
            objects.retain(|o| o != path);
        }
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        self.check()
    }
}

/// Records the reports it receives
#[derive(Default)]
pub struct MockNotifier {
    failing: AtomicBool,
    reports: Mutex<Vec<BackupWithFiles>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn reports(&self) -> Vec<BackupWithFiles> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    fn name(&self) -> &str {
        "Mock"
    }

    async fn backup_report(&self, backup: &BackupWithFiles) -> Result<()> {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(backup.clone());
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Notification {
                notifier: "Mock".to_string(),
                reason: "mock notifier failure".to_string(),
            });
        }
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}
