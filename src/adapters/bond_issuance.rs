//! High-yield bond issuance volume adapter (spec.md §2: `bond_issuance` /
//! `weekly_total`).
//!
//! Primary source is a configurable league-table endpoint (e.g. LCD/LSEG);
//! the secondary corroborates against a SIFMA-style aggregate. Grounded on
//! `scrapers/polymarket_api.rs::PolymarketScraper::fetch_markets`'s
//! `client.get(url).send().await?.json()` shape.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::adapter::{FetchContext, RawReading, SourceAdapter};
use crate::error::ScraperError;
use crate::models::{DataSource, MetricValue, Unit};
use crate::validator::Schema;

const PRIMARY_ENDPOINT_SECRET: &str = "BOND_ISSUANCE_PRIMARY_URL";
const SECONDARY_ENDPOINT_SECRET: &str = "BOND_ISSUANCE_SECONDARY_URL";

#[derive(Debug, Deserialize)]
struct WeeklyTotalResponse {
    week_ending: String,
    total_par_value_usd: f64,
    deal_count: u32,
}

pub struct BondIssuanceAdapter;

impl BondIssuanceAdapter {
    pub fn new() -> Self {
        Self
    }

    async fn fetch_from(ctx: &FetchContext, url: &str, source_flag: &str) -> Result<RawReading, ScraperError> {
        let response = ctx
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScraperError::transport("bond_issuance", e.to_string()))?;
        if !response.status().is_success() {
            return Err(ScraperError::transport(
                "bond_issuance",
                format!("endpoint returned {}", response.status()),
            ));
        }
        let body: WeeklyTotalResponse = response
            .json()
            .await
            .map_err(|e| ScraperError::parse_schema("bond_issuance", e.to_string()))?;

        let mut metadata = BTreeMap::new();
        metadata.insert("week_ending".to_string(), body.week_ending);
        metadata.insert("deal_count".to_string(), body.deal_count.to_string());

        Ok(RawReading {
            value: MetricValue::Scalar(body.total_par_value_usd),
            metadata,
            source_flag: source_flag.to_string(),
        })
    }
}

impl Default for BondIssuanceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for BondIssuanceAdapter {
    fn identity(&self) -> (DataSource, &str, Unit) {
        (DataSource::BondIssuance, "weekly_total", Unit::Currency)
    }

    fn preferred_cache_ttl(&self) -> Duration {
        Duration::from_secs(6 * 3600)
    }

    fn schema(&self) -> Schema {
        Schema {
            min: 0.0,
            max: 1.0e12,
            required_metadata_fields: vec!["week_ending".to_string()],
            expected_composite_cardinality: None,
        }
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<RawReading, ScraperError> {
        let url = ctx
            .secrets
            .get(PRIMARY_ENDPOINT_SECRET)
            .ok_or_else(|| ScraperError::auth_config("bond_issuance", "missing primary endpoint"))?;
        Self::fetch_from(ctx, &url, "league_table_primary").await
    }

    async fn secondary_sources(&self, ctx: &FetchContext) -> Vec<RawReading> {
        let Some(url) = ctx.secrets.get(SECONDARY_ENDPOINT_SECRET) else {
            return Vec::new();
        };
        match Self::fetch_from(ctx, &url, "sifma_aggregate").await {
            Ok(reading) => vec![reading],
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_matches_spec_metric() {
        let adapter = BondIssuanceAdapter::new();
        let (source, metric, unit) = adapter.identity();
        assert_eq!(source, DataSource::BondIssuance);
        assert_eq!(metric, "weekly_total");
        assert_eq!(unit, Unit::Currency);
    }

    #[test]
    fn schema_requires_week_ending() {
        let adapter = BondIssuanceAdapter::new();
        assert_eq!(adapter.schema().required_metadata_fields, vec!["week_ending".to_string()]);
    }
}
