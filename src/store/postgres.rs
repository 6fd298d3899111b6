//! Postgres-backed store (feature `postgres`).

use super::{group_files, BackupStore, BACKUP_COLUMNS, DRIVE_FILE_COLUMNS};
use crate::config::MetadataServerConfig;
use crate::model::{Backup, BackupWithFiles, DriveFile, NewBackup, NewDriveFile};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    fn pool_options() -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(300))
            .acquire_timeout(Duration::from_secs(30))
    }

    /// Connect to the configured server and apply migrations
    pub async fn connect(config: &MetadataServerConfig) -> Result<Self> {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .username(&config.user)
            .password(&config.password)
            .database(&config.db_name)
            .ssl_mode(if config.tls {
                PgSslMode::Require
            } else {
                PgSslMode::Prefer
            });
        if let Some(port) = config.port {
            options = options.port(port);
        }
        Self::connect_with(options).await
    }

    pub async fn connect_with(options: PgConnectOptions) -> Result<Self> {
        let pool = Self::pool_options().connect_with(options).await?;
        sqlx::migrate!("./migrations/postgres").run(&pool).await?;
        debug!("Connected to the Postgres metadata database");
        Ok(Self { pool })
    }

    async fn attach_files(&self, backups: Vec<Backup>) -> Result<Vec<BackupWithFiles>> {
        if backups.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = backups.iter().map(|b| b.id).collect();
        let files: Vec<DriveFile> = sqlx::query_as(&format!(
            "SELECT {} FROM drive_files WHERE backup_id = ANY($1) ORDER BY created_at ASC",
            DRIVE_FILE_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(group_files(backups, files))
    }
}

#[async_trait]
impl BackupStore for PostgresStore {
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
        Ok(self.attach_files(vec![backup]).await?.pop())
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
