//! Backup report notifications.

use crate::config::NotifiersConfig;
use crate::model::BackupWithFiles;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod mail;
pub mod report;
pub mod webhook;

pub use mail::MailNotifier;
pub use report::BackupReport;
pub use webhook::WebhookNotifier;

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Report the outcome of a backup
    async fn backup_report(&self, backup: &BackupWithFiles) -> Result<()>;

    async fn health(&self) -> Result<()>;
}

/// Build the enabled notifiers
pub fn from_config(config: &NotifiersConfig) -> Result<Vec<Arc<dyn Notifier>>> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
    if config.mail.enabled {
        notifiers.push(Arc::new(MailNotifier::new(&config.mail)?));
    }
    if config.webhooks.enabled && !config.webhooks.endpoints.is_empty() {
        notifiers.push(Arc::new(WebhookNotifier::new(
            config.webhooks.endpoints.clone(),
        )?));
    }
    Ok(notifiers)
}
