//! SQLite-backed store.

use super::{group_files, BackupStore, ATTACH_BATCH, BACKUP_COLUMNS, DRIVE_FILE_COLUMNS};
use crate::model::{Backup, BackupWithFiles, DriveFile, NewBackup, NewDriveFile};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::QueryBuilder;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    fn pool_options() -> SqlitePoolOptions {
        SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(300))
            .acquire_timeout(Duration::from_secs(30))
    }

    /// Open (or create) the database file and apply migrations
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);
        let pool = Self::pool_options().connect_with(options).await?;
        debug!("Opened metadata database at {}", db_path.display());
        Self::with_pool(pool).await
    }

    /// Fresh in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations/sqlite").run(&pool).await?;
        Ok(Self { pool })
    }

    async fn attach_files(&self, backups: Vec<Backup>) -> Result<Vec<BackupWithFiles>> {
        let mut files = Vec::new();
        for batch in backups.chunks(ATTACH_BATCH) {
            let mut query = QueryBuilder::<Sqlite>::new(format!(
                "SELECT {} FROM drive_files WHERE backup_id IN (",
                DRIVE_FILE_COLUMNS
            ));
            let mut ids = query.separated(", ");
            for backup in batch {
                ids.push_bind(backup.id);
            }
            query.push(") ORDER BY created_at ASC");
            files.extend(
                query
                    .build_query_as::<DriveFile>()
                    .fetch_all(&self.pool)
                    .await?,
            );
        }
        Ok(group_files(backups, files))
    }
}

#[async_trait]
impl BackupStore for SqliteStore {
    async fn create_backup(&self, new: NewBackup) -> Result<Backup> {
        let now = Utc::now();
        let backup: Backup = sqlx::query_as(&format!(
            "INSERT INTO backups ({}) VALUES ($1, $2, $3, NULL, $4, $4) RETURNING {}",
            BACKUP_COLUMNS, BACKUP_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&new.label)
        .bind(new.status)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(backup)
    }

    async fn update_backup(&self, backup: &Backup) -> Result<Backup> {
        sqlx::query_as(&format!(
            "UPDATE backups SET label = $2, status = $3, dump_path = $4, updated_at = $5
             WHERE id = $1 RETURNING {}",
            BACKUP_COLUMNS
        ))
        .bind(backup.id)
        .bind(&backup.label)
        .bind(backup.status)
        .bind(&backup.dump_path)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::BackupNotFound { id: backup.id })
    }

    async fn find_backup(&self, id: Uuid) -> Result<Option<Backup>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM backups WHERE id = $1",
            BACKUP_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_backup(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM backups WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::BackupNotFound { id });
        }
        Ok(())
    }

    async fn find_backup_with_files(&self, id: Uuid) -> Result<Option<BackupWithFiles>> {
        let Some(backup) = self.find_backup(id).await? else {
            return Ok(None);
        };
        let drive_files: Vec<DriveFile> = sqlx::query_as(&format!(
            "SELECT {} FROM drive_files WHERE backup_id = $1 ORDER BY created_at ASC",
            DRIVE_FILE_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(Some(BackupWithFiles {
            backup,
            drive_files,
        }))
    }

    async fn list_backups_with_files(&self) -> Result<Vec<BackupWithFiles>> {
        let backups: Vec<Backup> = sqlx::query_as(&format!(
            "SELECT {} FROM backups ORDER BY created_at DESC",
            BACKUP_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        self.attach_files(backups).await
    }

    async fn list_backups_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<BackupWithFiles>> {
        let backups: Vec<Backup> = sqlx::query_as(&format!(
            "SELECT {} FROM backups WHERE created_at < $1 ORDER BY created_at ASC",
            BACKUP_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        self.attach_files(backups).await
    }

    async fn create_drive_file(&self, new: NewDriveFile) -> Result<DriveFile> {
        let now = Utc::now();
        let file: DriveFile = sqlx::query_as(&format!(
            "INSERT INTO drive_files ({}) VALUES ($1, $2, $3, $4, NULL, $5, $6, $6) RETURNING {}",
            DRIVE_FILE_COLUMNS, DRIVE_FILE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(new.backup_id)
        .bind(&new.provider)
        .bind(&new.label)
        .bind(new.status)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(file)
    }

    async fn update_drive_file(&self, file: &DriveFile) -> Result<DriveFile> {
        sqlx::query_as(&format!(
            "UPDATE drive_files SET provider = $2, label = $3, path = $4, status = $5, updated_at = $6
             WHERE id = $1 RETURNING {}",
            DRIVE_FILE_COLUMNS
        ))
        .bind(file.id)
        .bind(&file.provider)
        .bind(&file.label)
        .bind(&file.path)
        .bind(file.status)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::DriveFileNotFound { id: file.id })
    }

    async fn find_drive_file(&self, id: Uuid) -> Result<Option<DriveFile>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM drive_files WHERE id = $1",
            DRIVE_FILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_drive_file(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM drive_files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::DriveFileNotFound { id });
        }
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackupStatus;
    use crate::store::contract;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_backup_lifecycle() {
        let store = SqliteStore::in_memory().await.unwrap();
        contract::backup_lifecycle(&store).await;
    }

    #[tokio::test]
    async fn test_drive_files_follow_backup() {
        let store = SqliteStore::in_memory().await.unwrap();
        contract::drive_files_follow_backup(&store).await;
    }

    #[tokio::test]
    async fn test_listing_order() {
        let store = SqliteStore::in_memory().await.unwrap();
        contract::listing_order(&store).await;
    }

    #[tokio::test]
    async fn test_listing_attaches_own_files() {
        let store = SqliteStore::in_memory().await.unwrap();
        contract::listing_attaches_own_files(&store).await;
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("meta").join("backupman.db");

        let id = {
            let store = SqliteStore::open(&db_path).await.unwrap();
            store.health().await.unwrap();
            let backup = store
                .create_backup(NewBackup {
                    label: "shop".to_string(),
                    status: BackupStatus::Pending,
                })
                .await
                .unwrap();
            backup.id
        };

        let store = SqliteStore::open(&db_path).await.unwrap();
        let backup = store.get_backup(id).await.unwrap();
        assert_eq!(backup.label, "shop");
    }
}
