use super::{Actuator, DispatchError, Notifier, TriggerContext};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

/// IFTTT-style maker webhook: `POST {base}/trigger/{event}/with/key/{key}`.
pub struct MakerWebhookActuator {
    client: Client,
    base_url: String,
    key: Option<String>,
}

impl MakerWebhookActuator {
    pub fn new(client: Client, base_url: impl Into<String>, key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key,
        }
    }
}

#[async_trait]
impl Actuator for MakerWebhookActuator {
    async fn trigger(&self, event_id: &str, ctx: &TriggerContext) -> Result<(), DispatchError> {
        let key = self
            .key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(DispatchError::NotConfigured("charger.webhook_key"))?;
        let url = format!("{}/trigger/{}/with/key/{}", self.base_url, event_id, key);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "value1": ctx.soc.map(|soc| format!("{:.1}", soc)).unwrap_or_default(),
                "value2": ctx.label,
                "value3": ctx.timestamp.to_rfc3339(),
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()));
        }
        tracing::debug!(event_id, status = status.as_u16(), "actuator webhook accepted");
        Ok(())
    }
}

/// Posts `{subject, body}` JSON to a fixed URL (mail relay, chat hook, ...).
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "subject": subject, "body": body }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Used when no notification endpoint is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), DispatchError> {
        tracing::info!(subject, body, "notification");
        Ok(())
    }
}
