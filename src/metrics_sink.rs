//! Best-effort operational metrics sink (spec.md §4.10, ambient observability).
//!
//! Fire-and-forget HTTP POST of a `ScraperResult` summary, matching the
//! teacher's one-off `reqwest` POST pattern in `scrapers/dome.rs` for
//! reporting. Failures here are logged and swallowed — metrics delivery
//! never affects a run's outcome.

use serde::Serialize;
use tracing::warn;

use crate::models::ScraperResult;

#[derive(Debug, Serialize)]
struct MetricsEnvelope<'a> {
    scraper: &'a str,
    success: bool,
    duration_seconds: f64,
    retry_count: u32,
    used_fallback: bool,
    confidence: Option<f64>,
}

pub struct MetricsSink {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl MetricsSink {
    pub fn new(client: reqwest::Client, endpoint: Option<String>) -> Self {
        Self { client, endpoint }
    }

    pub fn disabled() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: None,
        }
    }

    /// Sends the summary if an endpoint is configured. Never returns an
    /// error to the caller; a delivery failure is a `warn!` log line.
    pub async fn report(&self, scraper: &str, result: &ScraperResult) {
        let Some(endpoint) = &self.endpoint else {
            return;
        };
        let envelope = MetricsEnvelope {
            scraper,
            success: result.success,
            duration_seconds: result.execution_duration.as_secs_f64(),
            retry_count: result.retry_count,
            used_fallback: result.used_fallback,
            confidence: result.metric_point.as_ref().map(|p| p.confidence),
        };
        if let Err(e) = self.client.post(endpoint).json(&envelope).send().await {
            warn!(scraper, error = %e, "metrics sink delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn disabled_sink_is_a_no_op() {
        let sink = MetricsSink::disabled();
        let result = ScraperResult {
            success: true,
            metric_point: None,
            error: None,
            execution_duration: Duration::from_secs(1),
            retry_count: 0,
            used_fallback: false,
        };
        sink.report("bdc_discount", &result).await;
    }
}
