//! Alert sinks: where dispatched alerts end up.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::AlertError;
use crate::types::{Alert, AlertLevel};

/// External destination for alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert; errors are retried by the caller.
    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError>;

    fn name(&self) -> &str;
}

/// POSTs alerts as JSON to a webhook.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AlertError::Delivery(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| AlertError::Delivery(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AlertError::Status(status.as_u16()))
        }
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Writes alerts to the tracing log; used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        let report = alert.related_report_id.map(|id| id.to_string());
        match alert.level {
            AlertLevel::Info => info!(report_id = ?report, "alert: {}", alert.message),
            AlertLevel::Warning => warn!(report_id = ?report, "alert: {}", alert.message),
            AlertLevel::Critical => error!(report_id = ?report, "alert: {}", alert.message),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
