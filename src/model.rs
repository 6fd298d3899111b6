//! Backup and drive-file records kept in the metadata store.
//!
//! A [`Backup`] is one dump of one data source. Every configured drive gets a
//! [`DriveFile`] tracking the upload of that dump. API payloads use PascalCase
//! field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::{Database, Decode, Encode, FromRow, Type};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle state of a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    Finished,
    Failed,
}

/// Lifecycle state of a single upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveFileStatus {
    Pending,
    Finished,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Finished => "finished",
            BackupStatus::Failed => "failed",
        }
    }
}

impl DriveFileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriveFileStatus::Pending => "pending",
            DriveFileStatus::Finished => "finished",
            DriveFileStatus::Failed => "failed",
        }
    }
}

#[derive(Error, Debug)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(String);

/// Display, parsing and a plain text column on every supported database
macro_rules! text_status {
    ($status:ident) => {
        impl fmt::Display for $status {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $status {
            type Err = UnknownStatus;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    "pending" => Ok($status::Pending),
                    "finished" => Ok($status::Finished),
                    "failed" => Ok($status::Failed),
                    other => Err(UnknownStatus(other.to_string())),
                }
            }
        }

        impl<DB: Database> Type<DB> for $status
        where
            str: Type<DB>,
        {
            fn type_info() -> DB::TypeInfo {
                <str as Type<DB>>::type_info()
            }

            fn compatible(ty: &DB::TypeInfo) -> bool {
                <str as Type<DB>>::compatible(ty)
            }
        }

        impl<'q, DB: Database> Encode<'q, DB> for $status
        where
            &'q str: Encode<'q, DB>,
        {
            fn encode_by_ref(
                &self,
                buf: &mut <DB as Database>::ArgumentBuffer<'q>,
            ) -> Result<IsNull, BoxDynError> {
                <&'q str as Encode<'q, DB>>::encode(self.as_str(), buf)
            }
        }

        impl<'r, DB: Database> Decode<'r, DB> for $status
        where
            String: Decode<'r, DB>,
        {
            fn decode(value: <DB as Database>::ValueRef<'r>) -> Result<Self, BoxDynError> {
                Ok(<String as Decode<'r, DB>>::decode(value)?.parse()?)
            }
        }
    };
}

text_status!(BackupStatus);
text_status!(DriveFileStatus);

/// One dump of one data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "PascalCase")]
pub struct Backup {
    pub id: Uuid,
    pub label: String,
    pub status: BackupStatus,
    /// Local dump file, cleared once the dump has been removed
    pub dump_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The copy of a backup on one drive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "PascalCase")]
pub struct DriveFile {
    pub id: Uuid,
    pub backup_id: Uuid,
    /// Drive provider name (`local`, `s3`, `google_drive`)
    pub provider: String,
    /// Label of the drive the file was uploaded to
    pub label: String,
    /// Provider-specific location returned by the upload
    pub path: Option<String>,
    pub status: DriveFileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A backup together with all of its drive files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupWithFiles {
    #[serde(flatten)]
    pub backup: Backup,
    pub drive_files: Vec<DriveFile>,
}

#[derive(Debug, Clone)]
pub struct NewBackup {
    pub label: String,
    pub status: BackupStatus,
}

#[derive(Debug, Clone)]
pub struct NewDriveFile {
    pub backup_id: Uuid,
    pub provider: String,
    pub label: String,
    pub status: DriveFileStatus,
}

/// Derive a backup status from the state of its uploads.
///
/// Any pending upload keeps the backup pending, otherwise any failed upload
/// fails it. A backup without uploads is finished.
pub fn resolve_status(drive_files: &[DriveFile]) -> BackupStatus {
    if drive_files
        .iter()
        .any(|f| f.status == DriveFileStatus::Pending)
    {
        BackupStatus::Pending
    } else if drive_files
        .iter()
        .any(|f| f.status == DriveFileStatus::Failed)
    {
        BackupStatus::Failed
    } else {
        BackupStatus::Finished
    }
}
