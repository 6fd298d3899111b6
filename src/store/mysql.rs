//! MySQL-backed store (feature `mysql`).
//!
//! MySQL has no `RETURNING`, so writes read the row back by id.

use super::{group_files, BackupStore, ATTACH_BATCH, BACKUP_COLUMNS, DRIVE_FILE_COLUMNS};
use crate::config::MetadataServerConfig;
use crate::model::{Backup, BackupWithFiles, DriveFile, NewBackup, NewDriveFile};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use sqlx::QueryBuilder;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MysqlStore {
    pool: MySqlPool,
}

impl MysqlStore {
    fn pool_options() -> MySqlPoolOptions {
        MySqlPoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(300))
            .acquire_timeout(Duration::from_secs(30))
    }

    /// Connect to the configured server and apply migrations
    pub async fn connect(config: &MetadataServerConfig) -> Result<Self> {
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .username(&config.user)
            .password(&config.password)
            .database(&config.db_name)
            .charset("utf8mb4")
            .ssl_mode(if config.tls {
                MySqlSslMode::Required
            } else {
                MySqlSslMode::Preferred
            });
        if let Some(port) = config.port {
            options = options.port(port);
        }
        Self::connect_with(options).await
    }

    pub async fn connect_with(options: MySqlConnectOptions) -> Result<Self> {
        let pool = Self::pool_options().connect_with(options).await?;
        sqlx::migrate!("./migrations/mysql").run(&pool).await?;
        debug!("Connected to the MySQL metadata database");
        Ok(Self { pool })
    }

    async fn attach_files(&self, backups: Vec<Backup>) -> Result<Vec<BackupWithFiles>> {
        let mut files = Vec::new();
        for batch in backups.chunks(ATTACH_BATCH) {
            let mut query = QueryBuilder::<MySql>::new(format!(
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
impl BackupStore for MysqlStore {
    async fn create_backup(&self, new: NewBackup) -> Result<Backup> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(&format!(
            "INSERT INTO backups ({}) VALUES (?, ?, ?, NULL, ?, ?)",
            BACKUP_COLUMNS
        ))
        .bind(id)
        .bind(&new.label)
        .bind(new.status)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.get_backup(id).await
    }

    async fn update_backup(&self, backup: &Backup) -> Result<Backup> {
        sqlx::query(
            "UPDATE backups SET label = ?, status = ?, dump_path = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&backup.label)
        .bind(backup.status)
        .bind(&backup.dump_path)
        .bind(Utc::now())
        .bind(backup.id)
        .execute(&self.pool)
        .await?;
        self.get_backup(backup.id).await
    }

    async fn find_backup(&self, id: Uuid) -> Result<Option<Backup>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM backups WHERE id = ?",
            BACKUP_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_backup(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM backups WHERE id = ?")
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
            "SELECT {} FROM backups WHERE created_at < ? ORDER BY created_at ASC",
            BACKUP_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        self.attach_files(backups).await
    }

    async fn create_drive_file(&self, new: NewDriveFile) -> Result<DriveFile> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(&format!(
            "INSERT INTO drive_files ({}) VALUES (?, ?, ?, ?, NULL, ?, ?, ?)",
            DRIVE_FILE_COLUMNS
        ))
        .bind(id)
        .bind(new.backup_id)
        .bind(&new.provider)
        .bind(&new.label)
        .bind(new.status)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.get_drive_file(id).await
    }

    async fn update_drive_file(&self, file: &DriveFile) -> Result<DriveFile> {
        sqlx::query(
            "UPDATE drive_files SET provider = ?, label = ?, path = ?, status = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&file.provider)
        .bind(&file.label)
        .bind(&file.path)
        .bind(file.status)
        .bind(Utc::now())
        .bind(file.id)
        .execute(&self.pool)
        .await?;
        self.get_drive_file(file.id).await
    }

    async fn find_drive_file(&self, id: Uuid) -> Result<Option<DriveFile>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {} FROM drive_files WHERE id = ?",
            DRIVE_FILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_drive_file(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM drive_files WHERE id = ?")
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
    //! Run against a live server when `BACKUPMAN_TEST_MYSQL_URL` is set, each
    //! test in a database of its own. The account needs `CREATE` rights.

    use super::*;
    use crate::store::contract;
    use std::str::FromStr;

    async fn scratch_store() -> Option<MysqlStore> {
        let Ok(url) = std::env::var("BACKUPMAN_TEST_MYSQL_URL") else {
            eprintln!("BACKUPMAN_TEST_MYSQL_URL not set, skipping");
            return None;
        };
        let options = MySqlConnectOptions::from_str(&url).unwrap();
        let name = format!("backupman_{}", Uuid::new_v4().simple());
        let admin = MySqlPoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await
            .unwrap();
        sqlx::query(&format!("CREATE DATABASE {}", name))
            .execute(&admin)
            .await
            .unwrap();
        Some(MysqlStore::connect_with(options.database(&name)).await.unwrap())
    }

    #[tokio::test]
    async fn test_backup_lifecycle() {
        if let Some(store) = scratch_store().await {
            contract::backup_lifecycle(&store).await;
        }
    }

    #[tokio::test]
    async fn test_drive_files_follow_backup() {
        if let Some(store) = scratch_store().await {
            contract::drive_files_follow_backup(&store).await;
        }
    }

    #[tokio::test]
    async fn test_listing_order() {
        if let Some(store) = scratch_store().await {
            contract::listing_order(&store).await;
        }
    }

    #[tokio::test]
    async fn test_listing_attaches_own_files() {
        if let Some(store) = scratch_store().await {
            contract::listing_attaches_own_files(&store).await;
        }
    }
}
