//! Error types for Backupman

use thiserror::Error;
use uuid::Uuid;

/// Main error type for Backupman operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Backup not found: {id}")]
    BackupNotFound { id: Uuid },

    #[error("Drive file not found: {id}")]
    DriveFileNotFound { id: Uuid },

    #[error("Dump of {label} failed: {reason}")]
    Dump { label: String, reason: String },

    #[error("Drive {drive} failed: {reason}")]
    Drive { drive: String, reason: String },

    #[error("Integrity verification failed: {reason}")]
    IntegrityError { reason: String },

    #[error("Notifier {notifier} failed: {reason}")]
    Notification { notifier: String, reason: String },

    #[error("Scheduling error: {reason}")]
    Scheduling { reason: String },

    #[error("Retention failed: {reason}")]
    Retention { reason: String },

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Feature not available: {feature}")]
    FeatureNotAvailable { feature: String },
}

impl Error {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Error::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn drive(drive: &str, reason: impl ToString) -> Self {
        Error::Drive {
            drive: drive.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for Backupman operations
pub type Result<T> = std::result::Result<T, Error>;
