//! Metadata store for backups and their drive files.

use crate::model::{Backup, BackupWithFiles, DriveFile, NewBackup, NewDriveFile};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

pub mod memory;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "mysql")]
pub use mysql::MysqlStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

const BACKUP_COLUMNS: &str = "id, label, status, dump_path, created_at, updated_at";
const DRIVE_FILE_COLUMNS: &str =
    "id, backup_id, provider, label, path, status, created_at, updated_at";

/// Backup ids bound per `IN (...)` lookup of drive files
const ATTACH_BATCH: usize = 500;

/// Pair each backup with its drive files, keeping the order of both lists
fn group_files(backups: Vec<Backup>, files: Vec<DriveFile>) -> Vec<BackupWithFiles> {
    let mut by_backup: HashMap<Uuid, Vec<DriveFile>> = HashMap::new();
    for file in files {
        by_backup.entry(file.backup_id).or_default().push(file);
    }
    backups
        .into_iter()
        .map(|backup| {
            let drive_files = by_backup.remove(&backup.id).unwrap_or_default();
            BackupWithFiles {
                backup,
                drive_files,
            }
        })
        .collect()
}

/// Persistence for backup and drive-file records
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn create_backup(&self, new: NewBackup) -> Result<Backup>;

    /// Write every field of the backup and bump `updated_at`
    async fn update_backup(&self, backup: &Backup) -> Result<Backup>;

    async fn find_backup(&self, id: Uuid) -> Result<Option<Backup>>;

    /// Delete a backup and all of its drive files
    async fn delete_backup(&self, id: Uuid) -> Result<()>;

    async fn find_backup_with_files(&self, id: Uuid) -> Result<Option<BackupWithFiles>>;

    /// Every backup with its drive files, newest first
    async fn list_backups_with_files(&self) -> Result<Vec<BackupWithFiles>>;

    /// Backups created strictly before `cutoff`, oldest first
    async fn list_backups_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackupWithFiles>>;

    async fn create_drive_file(&self, new: NewDriveFile) -> Result<DriveFile>;

    /// Write every field of the drive file and bump `updated_at`
    async fn update_drive_file(&self, file: &DriveFile) -> Result<DriveFile>;

    async fn find_drive_file(&self, id: Uuid) -> Result<Option<DriveFile>>;

    async fn delete_drive_file(&self, id: Uuid) -> Result<()>;

    async fn health(&self) -> Result<()>;

    async fn get_backup(&self, id: Uuid) -> Result<Backup> {
        self.find_backup(id)
            .await?
            .ok_or(Error::BackupNotFound { id })
    }

    async fn get_backup_with_files(&self, id: Uuid) -> Result<BackupWithFiles> {
        self.find_backup_with_files(id)
            .await?
            .ok_or(Error::BackupNotFound { id })
    }

    async fn get_drive_file(&self, id: Uuid) -> Result<DriveFile> {
        self.find_drive_file(id)
            .await?
            .ok_or(Error::DriveFileNotFound { id })
    }
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behavior every store implementation shares

    use super::*;
    use crate::model::{BackupStatus, DriveFileStatus};
    use chrono::Duration;

    fn new_backup(label: &str) -> NewBackup {
        NewBackup {
            label: label.to_string(),
            status: BackupStatus::Pending,
        }
    }

    fn new_drive_file(backup_id: Uuid, label: &str) -> NewDriveFile {
        NewDriveFile {
            backup_id,
            provider: "local".to_string(),
            label: label.to_string(),
            status: DriveFileStatus::Pending,
        }
    }

    pub async fn backup_lifecycle(store: &dyn BackupStore) {
        let backup = store.create_backup(new_backup("shop")).await.unwrap();
        assert_eq!(backup.status, BackupStatus::Pending);
        assert!(backup.dump_path.is_none());

        let mut changed = backup.clone();
        changed.status = BackupStatus::Failed;
        changed.dump_path = Some("/tmp/dump.sql".to_string());
        let updated = store.update_backup(&changed).await.unwrap();
        assert!(updated.updated_at >= backup.updated_at);

        let found = store.get_backup(backup.id).await.unwrap();
        assert_eq!(found.status, BackupStatus::Failed);
        assert_eq!(found.dump_path.as_deref(), Some("/tmp/dump.sql"));

        store.delete_backup(backup.id).await.unwrap();
        assert!(store.find_backup(backup.id).await.unwrap().is_none());
        assert!(matches!(
            store.get_backup(backup.id).await,
            Err(Error::BackupNotFound { .. })
        ));
        assert!(store.delete_backup(backup.id).await.is_err());
    }

    pub async fn drive_files_follow_backup(store: &dyn BackupStore) {
        let backup = store.create_backup(new_backup("shop")).await.unwrap();
        let first = store
            .create_drive_file(new_drive_file(backup.id, "disk"))
            .await
            .unwrap();
        let second = store
            .create_drive_file(new_drive_file(backup.id, "bucket"))
            .await
            .unwrap();

        let mut done = first.clone();
        done.status = DriveFileStatus::Finished;
        done.path = Some("/backups/20250101000000.sql".to_string());
        store.update_drive_file(&done).await.unwrap();

        let full = store.get_backup_with_files(backup.id).await.unwrap();
        assert_eq!(full.drive_files.len(), 2);
        let stored = store.get_drive_file(first.id).await.unwrap();
        assert_eq!(stored.status, DriveFileStatus::Finished);
        assert_eq!(stored.path, done.path);

        store.delete_drive_file(second.id).await.unwrap();
        let full = store.get_backup_with_files(backup.id).await.unwrap();
        assert_eq!(full.drive_files.len(), 1);

        store.delete_backup(backup.id).await.unwrap();
        assert!(matches!(
            store.get_drive_file(first.id).await,
            Err(Error::DriveFileNotFound { .. })
        ));
    }

    pub async fn listing_attaches_own_files(store: &dyn BackupStore) {
        let old = store.create_backup(new_backup("a")).await.unwrap();
        store
            .create_drive_file(new_drive_file(old.id, "disk"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let recent = store.create_backup(new_backup("b")).await.unwrap();
        let recent_file = store
            .create_drive_file(new_drive_file(recent.id, "bucket"))
            .await
            .unwrap();
        let bare = store.create_backup(new_backup("c")).await.unwrap();

        let all = store.list_backups_with_files().await.unwrap();
        for full in &all {
            assert!(full.drive_files.iter().all(|f| f.backup_id == full.backup.id));
        }
        let recent_full = all.iter().find(|b| b.backup.id == recent.id).unwrap();
        assert_eq!(recent_full.drive_files.len(), 1);
        assert_eq!(recent_full.drive_files[0].id, recent_file.id);
        let bare_full = all.iter().find(|b| b.backup.id == bare.id).unwrap();
        assert!(bare_full.drive_files.is_empty());

        let older = store.list_backups_older_than(recent.created_at).await.unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].drive_files.len(), 1);
        assert_eq!(older[0].drive_files[0].label, "disk");
    }

    pub async fn listing_order(store: &dyn BackupStore) {
        let first = store.create_backup(new_backup("a")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.create_backup(new_backup("b")).await.unwrap();

        let all = store.list_backups_with_files().await.unwrap();
        let ids: Vec<Uuid> = all.iter().map(|b| b.backup.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        let cutoff = second.created_at;
        let old = store.list_backups_older_than(cutoff).await.unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].backup.id, first.id);

        let none = store
            .list_backups_older_than(first.created_at - Duration::days(1))
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
