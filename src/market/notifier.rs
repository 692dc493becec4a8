use crate::config;
use crate::engine::models::{InstrumentKey, SignalStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Alert handed to the notifier when the de-duplicator lets a signal through
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub instrument_key: InstrumentKey,
    pub status: SignalStatus,
    pub price: Option<f64>,
    pub timestamp: DateTime<Utc>,
    /// Contract description for option legs, e.g. `NIFTY 30-Dec-2025 26000CE`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
}

impl Alert {
    pub fn message(&self) -> String {
        let subject = self
            .contract
            .clone()
            .unwrap_or_else(|| self.instrument_key.to_string());
        match self.price {
            Some(price) => format!(
                "{} {} @ {:.2} ({})",
                self.status.as_str().to_uppercase(),
                subject,
                price,
                self.timestamp.format("%H:%M")
            ),
            None => format!(
                "{} {} ({})",
                self.status.as_str().to_uppercase(),
                subject,
                self.timestamp.format("%H:%M")
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the log only.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, alert: &Alert) -> Result<()> {
        info!(
            target: "alerts",
            instrument = %alert.instrument_key,
            status = %alert.status,
            price = alert.price,
            "{}",
            alert.message()
        );
        Ok(())
    }
}

/// POSTs each alert as JSON, with a ready-to-display `text` field.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    text: String,
    #[serde(flatten)]
    alert: &'a Alert,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config::USER_AGENT)
            .timeout(config::HTTP_TIMEOUT)
            .build()
            .context("Failed to build webhook client")?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, alert: &Alert) -> Result<()> {
        let body = WebhookBody { text: alert.message(), alert };
        let res = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("Webhook send failed")?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            let preview: String = text.chars().take(200).collect();
            anyhow::bail!("Webhook rejected alert with {}: {}", status, preview);
        }
        Ok(())
    }
}
