//! Private credit fund mark adapter (spec.md §2: `credit_fund` /
//! `fair_value_mark`).
//!
//! Quarterly filings publish several extracted figures per fund (fair value
//! mark, unrealized depreciation, non-accrual ratio) — represented as a
//! `MetricValue::Composite` with a `"primary"` key for the headline mark.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::adapter::{FetchContext, RawReading, SourceAdapter};
use crate::error::ScraperError;
use crate::models::{DataSource, MetricValue, Unit};
use crate::validator::Schema;

const PRIMARY_ENDPOINT_SECRET: &str = "CREDIT_FUND_FILINGS_URL";

#[derive(Debug, Deserialize)]
struct CreditFundFiling {
    fund_id: String,
    filing_period: String,
    fair_value_mark: f64,
    unrealized_depreciation_pct: f64,
    non_accrual_ratio: f64,
}

pub struct CreditFundAdapter;

impl CreditFundAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CreditFundAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for CreditFundAdapter {
    fn identity(&self) -> (DataSource, &str, Unit) {
        (DataSource::CreditFund, "fair_value_mark", Unit::Ratio)
    }

    fn preferred_cache_ttl(&self) -> Duration {
        Duration::from_secs(7 * 24 * 3600)
    }

    fn schema(&self) -> Schema {
        Schema {
            min: 0.0,
            max: 2.0,
            required_metadata_fields: vec!["fund_id".to_string(), "filing_period".to_string()],
            expected_composite_cardinality: Some(3),
        }
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<RawReading, ScraperError> {
        let url = ctx
            .secrets
            .get(PRIMARY_ENDPOINT_SECRET)
            .ok_or_else(|| ScraperError::auth_config("credit_fund", "missing filings endpoint"))?;
        let response = ctx
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ScraperError::transport("credit_fund", e.to_string()))?;
        if !response.status().is_success() {
            return Err(ScraperError::transport(
                "credit_fund",
                format!("endpoint returned {}", response.status()),
            ));
        }
        let filing: CreditFundFiling = response
            .json()
            .await
            .map_err(|e| ScraperError::parse_schema("credit_fund", e.to_string()))?;

        let mut composite = BTreeMap::new();
        composite.insert("primary".to_string(), filing.fair_value_mark);
        composite.insert("unrealized_depreciation_pct".to_string(), filing.unrealized_depreciation_pct);
        composite.insert("non_accrual_ratio".to_string(), filing.non_accrual_ratio);

        let mut metadata = BTreeMap::new();
        metadata.insert("fund_id".to_string(), filing.fund_id);
        metadata.insert("filing_period".to_string(), filing.filing_period);

        Ok(RawReading {
            value: MetricValue::Composite(composite),
            metadata,
            source_flag: "quarterly_filing".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_matches_spec_metric() {
        let adapter = CreditFundAdapter::new();
        let (source, metric, unit) = adapter.identity();
        assert_eq!(source, DataSource::CreditFund);
        assert_eq!(metric, "fair_value_mark");
        assert_eq!(unit, Unit::Ratio);
    }

    #[test]
    fn schema_expects_three_composite_components() {
        let schema = CreditFundAdapter::new().schema();
        assert_eq!(schema.expected_composite_cardinality, Some(3));
    }
}
