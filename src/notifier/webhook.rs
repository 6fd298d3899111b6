//! JSON webhook notifications signed with `X-Webhook-Token`.

use super::Notifier;
use crate::config::WebhookEndpointConfig;
use crate::model::BackupWithFiles;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

const TOKEN_HEADER: &str = "X-Webhook-Token";

/// Posts backup reports as JSON to every configured endpoint
pub struct WebhookNotifier {
    endpoints: Vec<WebhookEndpointConfig>,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WebhookEvent<'a> {
    event: &'static str,
    payload: &'a BackupWithFiles,
}

impl WebhookNotifier {
    pub fn new(endpoints: Vec<WebhookEndpointConfig>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { endpoints, client })
    }

    async fn send(&self, endpoint: &WebhookEndpointConfig, body: &WebhookEvent<'_>) -> Result<()> {
        let response = self
            .client
            .post(&endpoint.url)
            .header(TOKEN_HEADER, &endpoint.token)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(Error::Notification {
                notifier: self.name().to_string(),
                reason: format!("{} returned status {}", endpoint.url, status),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "Webhook"
    }

    /// Every endpoint is tried; the first failure is returned afterwards
    async fn backup_report(&self, backup: &BackupWithFiles) -> Result<()> {
        let event = WebhookEvent {
            event: "backup_report",
            payload: backup,
        };
        let mut first_error = None;
        for endpoint in &self.endpoints {
            match self.send(endpoint, &event).await {
                Ok(()) => debug!("Webhook {} notified", endpoint.name),
                Err(e) => {
                    error!(
                        "Failed to send webhook[backup_report] ({}): {}",
                        endpoint.url, e
                    );
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}
