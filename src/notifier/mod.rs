// Outbound actuator trigger and notification dispatch. The core only needs the outcome of each
// call; every call is bounded by a timeout and never retried here.

mod webhook;

pub use webhook::{LogNotifier, MakerWebhookActuator, WebhookNotifier};

use crate::config::{ChargerConfig, NotificationsConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("endpoint returned status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("not configured: {0}")]
    NotConfigured(&'static str),
}

/// Context sent with an actuator trigger.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerContext {
    pub soc: Option<f64>,
    pub label: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait Actuator: Send + Sync {
    async fn trigger(&self, event_id: &str, ctx: &TriggerContext) -> Result<(), DispatchError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), DispatchError>;
}

/// Runs an outbound call, failing with `DispatchError::Timeout` once `limit` elapses.
pub async fn with_timeout<F>(limit: Duration, call: F) -> Result<(), DispatchError>
where
    F: Future<Output = Result<(), DispatchError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(DispatchError::Timeout(limit)))
}

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))
}

pub fn build_actuator(config: &ChargerConfig) -> anyhow::Result<Arc<dyn Actuator>> {
    let client = http_client(Duration::from_secs(config.request_timeout_secs))?;
    Ok(Arc::new(MakerWebhookActuator::new(
        client,
        config.webhook_base_url.clone(),
        config.webhook_key.clone(),
    )))
}

pub fn build_notifier(config: &NotificationsConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    match config.webhook_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => {
            let client = http_client(Duration::from_secs(config.timeout_secs))?;
            Ok(Arc::new(WebhookNotifier::new(client, url.to_string())))
        }
        None => {
            tracing::info!("notifications.webhook_url not set; notifications are logged only");
            Ok(Arc::new(LogNotifier))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let r = with_timeout(Duration::from_secs(2), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(r, Err(DispatchError::Timeout(_))));
    }

    #[tokio::test]
    async fn fast_call_passes_through_result() {
        let r = with_timeout(Duration::from_secs(2), async { Err(DispatchError::Status(500)) }).await;
        assert!(matches!(r, Err(DispatchError::Status(500))));
    }
}
