//! SMTP report mails built with lettre.
//!
//! The `ssl` crypto setting means implicit TLS; `tls` means STARTTLS.

use super::{BackupReport, Notifier};
use crate::config::{MailNotifierConfig, SmtpCrypto};
use crate::model::BackupWithFiles;
use crate::{Error, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

pub const REPORT_SUBJECT: &str = "Backup Report";

/// Sends HTML backup reports over SMTP
pub struct MailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
}

impl MailNotifier {
    pub fn new(config: &MailNotifierConfig) -> Result<Self> {
        let error = |reason: String| Error::Notification {
            notifier: "Mail".to_string(),
            reason,
        };

        let mut builder = match config.smtp_crypto {
            SmtpCrypto::Ssl => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| error(e.to_string()))?,
            SmtpCrypto::Tls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                    .map_err(|e| error(e.to_string()))?
            }
            SmtpCrypto::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
            }
        }
        .port(config.smtp_port);
        if !config.smtp_user.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_user.clone(),
                config.smtp_password.clone(),
            ));
        }

        let from = config
            .from
            .clone()
            .filter(|f| !f.is_empty())
            .or_else(|| Some(config.smtp_user.clone()).filter(|u| u.contains('@')))
            .unwrap_or_else(|| "backupman@localhost".to_string());
        let from: Mailbox = from
            .parse()
            .map_err(|e| error(format!("invalid sender address {}: {}", from, e)))?;

        let recipients = config
            .destinations
            .iter()
            .map(|d| {
                let mailbox = if d.name.is_empty() {
                    d.email.clone()
                } else {
                    format!("{} <{}>", d.name, d.email)
                };
                mailbox
                    .parse::<Mailbox>()
                    .map_err(|e| error(format!("invalid destination {}: {}", d.email, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            transport: builder.build(),
            from,
            recipients,
        })
    }

    /// Build the report mail without sending it
    pub fn message(&self, backup: &BackupWithFiles) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(REPORT_SUBJECT)
            .header(ContentType::TEXT_HTML);
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }
        builder
            .body(BackupReport::from_backup(backup).to_html())
            .map_err(|e| self.error(e))
    }

    fn error(&self, reason: impl ToString) -> Error {
        Error::Notification {
            notifier: self.name().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for MailNotifier {
    fn name(&self) -> &str {
        "Mail"
    }

    async fn backup_report(&self, backup: &BackupWithFiles) -> Result<()> {
        if self.recipients.is_empty() {
            return Ok(());
        }
        let message = self.message(backup)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| self.error(e))?;
        info!(
            "Backup report for {} mailed to {} recipient(s)",
            backup.backup.id,
            self.recipients.len()
        );
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(self.error("SMTP server did not accept the connection")),
            Err(e) => Err(self.error(e)),
        }
    }
}
