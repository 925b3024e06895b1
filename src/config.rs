//! Process configuration (spec.md §5, §6).
//!
//! Grounded on `models.rs::Config::from_env` and
//! `scrapers/binance_session.rs::SessionConfig::from_env`'s
//! "read env vars, `.ok()`/default, validate once at startup" convention.

use std::time::Duration;

use crate::error::ScraperError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub state_store_path: String,
    pub cache_store_path: String,
    pub metrics_sink_endpoint: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub sms_gateway_endpoint: Option<String>,
    pub email_relay_endpoint: Option<String>,
    pub webhook_endpoint: Option<String>,
    pub secondary_fetch_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ScraperError> {
        dotenv::dotenv().ok();

        let environment = match std::env::var("ENVIRONMENT").ok().as_deref() {
            Some("production") => Environment::Production,
            _ => Environment::Development,
        };
        let state_store_path = std::env::var("STATE_STORE_PATH").unwrap_or_else(|_| "state_store.sqlite3".to_string());
        let cache_store_path = std::env::var("CACHE_STORE_PATH").unwrap_or_else(|_| "cache_store.sqlite3".to_string());
        let secondary_fetch_timeout_secs: u64 = std::env::var("SECONDARY_FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let config = Self {
            environment,
            state_store_path,
            cache_store_path,
            metrics_sink_endpoint: std::env::var("METRICS_SINK_ENDPOINT").ok(),
            slack_webhook_url: std::env::var("SLACK_WEBHOOK_URL").ok(),
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            sms_gateway_endpoint: std::env::var("SMS_GATEWAY_ENDPOINT").ok(),
            email_relay_endpoint: std::env::var("EMAIL_RELAY_ENDPOINT").ok(),
            webhook_endpoint: std::env::var("WEBHOOK_ENDPOINT").ok(),
            secondary_fetch_timeout: Duration::from_secs(secondary_fetch_timeout_secs),
        };

        if config.environment == Environment::Production && config.metrics_sink_endpoint.is_none() {
            tracing::warn!("running in production with no METRICS_SINK_ENDPOINT configured");
        }

        Ok(config)
    }
}
