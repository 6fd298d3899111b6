//! In-process store, used when no database is configured and in tests.

use super::BackupStore;
use crate::model::{Backup, BackupWithFiles, DriveFile, NewBackup, NewDriveFile};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    backups: HashMap<Uuid, Backup>,
    drive_files: HashMap<Uuid, DriveFile>,
}

impl Tables {
    fn with_files(&self, backup: &Backup) -> BackupWithFiles {
        let mut drive_files: Vec<DriveFile> = self
            .drive_files
            .values()
            .filter(|f| f.backup_id == backup.id)
            .cloned()
            .collect();
        drive_files.sort_by_key(|f| f.created_at);
        BackupWithFiles {
            backup: backup.clone(),
            drive_files,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackupStore for MemoryStore {
    async fn create_backup(&self, new: NewBackup) -> Result<Backup> {
        let now = Utc::now();
        let backup = Backup {
            id: Uuid::new_v4(),
            label: new.label,
            status: new.status,
            dump_path: None,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .write()
            .await
            .backups
            .insert(backup.id, backup.clone());
        Ok(backup)
    }

    async fn update_backup(&self, backup: &Backup) -> Result<Backup> {
        let mut tables = self.inner.write().await;
        let stored = tables
            .backups
            .get_mut(&backup.id)
            .ok_or(Error::BackupNotFound { id: backup.id })?;
        *stored = Backup {
            updated_at: Utc::now(),
            created_at: stored.created_at,
            ..backup.clone()
        };
        Ok(stored.clone())
    }

    async fn find_backup(&self, id: Uuid) -> Result<Option<Backup>> {
        Ok(self.inner.read().await.backups.get(&id).cloned())
    }

    async fn delete_backup(&self, id: Uuid) -> Result<()> {
        let mut tables = self.inner.write().await;
        tables
            .backups
            .remove(&id)
            .ok_or(Error::BackupNotFound { id })?;
        tables.drive_files.retain(|_, f| f.backup_id != id);
        Ok(())
    }

    async fn find_backup_with_files(&self, id: Uuid) -> Result<Option<BackupWithFiles>> {
        let tables = self.inner.read().await;
        Ok(tables.backups.get(&id).map(|b| tables.with_files(b)))
    }

    async fn list_backups_with_files(&self) -> Result<Vec<BackupWithFiles>> {
        let tables = self.inner.read().await;
        let mut backups: Vec<&Backup> = tables.backups.values().collect();
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups.into_iter().map(|b| tables.with_files(b)).collect())
    }

    async fn list_backups_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackupWithFiles>> {
        let tables = self.inner.read().await;
        let mut backups: Vec<&Backup> = tables
            .backups
            .values()
            .filter(|b| b.created_at < cutoff)
            .collect();
        backups.sort_by_key(|b| b.created_at);
        Ok(backups.into_iter().map(|b| tables.with_files(b)).collect())
    }

    async fn create_drive_file(&self, new: NewDriveFile) -> Result<DriveFile> {
        let mut tables = self.inner.write().await;
        if !tables.backups.contains_key(&new.backup_id) {
            return Err(Error::BackupNotFound { id: new.backup_id });
        }
        let now = Utc::now();
        let file = DriveFile {
            id: Uuid::new_v4(),
            backup_id: new.backup_id,
            provider: new.provider,
            label: new.label,
            path: None,
            status: new.status,
            created_at: now,
            updated_at: now,
        };
        tables.drive_files.insert(file.id, file.clone());
        Ok(file)
    }

    async fn update_drive_file(&self, file: &DriveFile) -> Result<DriveFile> {
        let mut tables = self.inner.write().await;
        let stored = tables
            .drive_files
            .get_mut(&file.id)
            .ok_or(Error::DriveFileNotFound { id: file.id })?;
        *stored = DriveFile {
            updated_at: Utc::now(),
            created_at: stored.created_at,
            ..file.clone()
        };
        Ok(stored.clone())
    }

    async fn find_drive_file(&self, id: Uuid) -> Result<Option<DriveFile>> {
        Ok(self.inner.read().await.drive_files.get(&id).cloned())
    }

    async fn delete_drive_file(&self, id: Uuid) -> Result<()> {
        self.inner
            .write()
            .await
            .drive_files
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::DriveFileNotFound { id })
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[tokio::test]
    async fn test_backup_lifecycle() {
        contract::backup_lifecycle(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_drive_files_follow_backup() {
        contract::drive_files_follow_backup(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_listing_order() {
        contract::listing_order(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_listing_attaches_own_files() {
        contract::listing_attaches_own_files(&MemoryStore::new()).await;
    }
}
