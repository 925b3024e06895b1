//! Alert channel dispatch (spec.md §4.8, §6).
//!
//! Each channel is an HTTP(S) POST of a compact JSON envelope, grounded on
//! the teacher's `reqwest::Client`-per-service convention
//! (`scrapers/dome.rs::DomeScraper::client`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ScraperError;
use crate::models::{AlertChannel, Severity};

#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub id: String,
    pub triggered_at: DateTime<Utc>,
    pub data_source: String,
    pub metric_name: String,
    pub observed_value: f64,
    pub baseline_value: Option<f64>,
    pub threshold: f64,
    pub severity: String,
    pub message: String,
}

impl AlertPayload {
    pub fn severity_str(severity: Severity) -> &'static str {
        match severity {
            Severity::Informational => "informational",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> AlertChannel;
    async fn send(&self, payload: &AlertPayload) -> Result<(), ScraperError>;
}

/// Generic JSON-webhook notifier; the same shape backs the Slack/Telegram/
/// webhook/dashboard channels, matching the teacher's one-`reqwest::Client`-
/// per-integration convention.
pub struct HttpWebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
    channel: AlertChannel,
}

impl HttpWebhookNotifier {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, channel: AlertChannel) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            channel,
        }
    }
}

#[async_trait]
impl Notifier for HttpWebhookNotifier {
    fn channel(&self) -> AlertChannel {
        self.channel
    }

    async fn send(&self, payload: &AlertPayload) -> Result<(), ScraperError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| ScraperError::dispatch(channel_name(self.channel), e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ScraperError::dispatch(
                channel_name(self.channel),
                format!("endpoint returned {}", response.status()),
            ))
        }
    }
}

/// SMTP email notifier stub: the core only needs the dispatch contract
/// (success/failure per channel), so this posts to a configured SMTP relay's
/// HTTP bridge rather than speaking SMTP directly — swappable behind the
/// `Notifier` trait without touching the Alert Engine.
pub struct EmailNotifier {
    client: reqwest::Client,
    relay_endpoint: String,
}

impl EmailNotifier {
    pub fn new(client: reqwest::Client, relay_endpoint: impl Into<String>) -> Self {
        Self {
            client,
            relay_endpoint: relay_endpoint.into(),
        }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> AlertChannel {
        AlertChannel::Email
    }

    async fn send(&self, payload: &AlertPayload) -> Result<(), ScraperError> {
        let response = self
            .client
            .post(&self.relay_endpoint)
            .json(payload)
            .send()
            .await
            .map_err(|e| ScraperError::dispatch("email", e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ScraperError::dispatch("email", format!("relay returned {}", response.status())))
        }
    }
}

fn channel_name(channel: AlertChannel) -> &'static str {
    match channel {
        AlertChannel::Email => "email",
        AlertChannel::Slack => "slack",
        AlertChannel::Telegram => "telegram",
        AlertChannel::Sms => "sms",
        AlertChannel::Webhook => "webhook",
        AlertChannel::Dashboard => "dashboard",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_str_matches_expected_tokens() {
        assert_eq!(AlertPayload::severity_str(Severity::Informational), "informational");
        assert_eq!(AlertPayload::severity_str(Severity::Critical), "critical");
    }
}
