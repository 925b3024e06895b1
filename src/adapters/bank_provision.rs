//! Bank loan-loss provision adapter (spec.md §2: `bank_provision` /
//! `provision_ratio`).
//!
//! Primary source parses a bank's quarterly call-report/10-Q extract for its
//! provision-for-credit-losses ratio; the secondary corroborates against an
//! independent XBRL-tagged filing aggregator.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::adapter::{FetchContext, RawReading, SourceAdapter};
use crate::error::ScraperError;
use crate::models::{DataSource, MetricValue, Unit};
use crate::validator::Schema;

const PRIMARY_ENDPOINT_SECRET: &str = "BANK_PROVISION_PRIMARY_URL";
const SECONDARY_ENDPOINT_SECRET: &str = "BANK_PROVISION_XBRL_URL";

#[derive(Debug, Deserialize)]
struct ProvisionExtract {
    bank_id: String,
    filing_period: String,
    provision_for_credit_losses: f64,
    total_loans: f64,
}

pub struct BankProvisionAdapter;

impl BankProvisionAdapter {
    pub fn new() -> Self {
        Self
    }

    fn ratio(extract: &ProvisionExtract) -> Option<f64> {
        if extract.total_loans == 0.0 {
            None
        } else {
            Some(extract.provision_for_credit_losses / extract.total_loans)
        }
    }
}

impl Default for BankProvisionAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for BankProvisionAdapter {
    fn identity(&self) -> (DataSource, &str, Unit) {
        (DataSource::BankProvision, "provision_ratio", Unit::Ratio)
    }

    fn preferred_cache_ttl(&self) -> Duration {
        Duration::from_secs(7 * 24 * 3600)
    }

    fn schema(&self) -> Schema {
        Schema {
            min: 0.0,
            max: 0.25,
            required_metadata_fields: vec!["bank_id".to_string(), "filing_period".to_string()],
            expected_composite_cardinality: None,
        }
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<RawReading, ScraperError> {
        let url = ctx
            .secrets
            .get(PRIMARY_ENDPOINT_SECRET)
            .ok_or_else(|| ScraperError::auth_config("bank_provision", "missing primary endpoint"))?;
        let response = ctx
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ScraperError::transport("bank_provision", e.to_string()))?;
        if !response.status().is_success() {
            return Err(ScraperError::transport(
                "bank_provision",
                format!("endpoint returned {}", response.status()),
            ));
        }
        let extract: ProvisionExtract = response
            .json()
            .await
            .map_err(|e| ScraperError::parse_schema("bank_provision", e.to_string()))?;
        let ratio = Self::ratio(&extract)
            .ok_or_else(|| ScraperError::parse_schema("bank_provision", "total_loans is zero"))?;

        let mut metadata = BTreeMap::new();
        metadata.insert("bank_id".to_string(), extract.bank_id);
        metadata.insert("filing_period".to_string(), extract.filing_period);

        Ok(RawReading {
            value: MetricValue::Scalar(ratio),
            metadata,
            source_flag: "call_report_primary".to_string(),
        })
    }

    async fn secondary_sources(&self, ctx: &FetchContext) -> Vec<RawReading> {
        let Some(url) = ctx.secrets.get(SECONDARY_ENDPOINT_SECRET) else {
            return Vec::new();
        };
        let result: Result<ProvisionExtract, ScraperError> = async {
            let response = ctx
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| ScraperError::transport("bank_provision", e.to_string()))?;
            response
                .json()
                .await
                .map_err(|e| ScraperError::parse_schema("bank_provision", e.to_string()))
        }
        .await;

        match result.ok().and_then(|extract| Self::ratio(&extract).map(|r| (extract, r))) {
            Some((_, ratio)) => vec![RawReading {
                value: MetricValue::Scalar(ratio),
                metadata: BTreeMap::new(),
                source_flag: "xbrl_aggregator".to_string(),
            }],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_matches_spec_metric() {
        let adapter = BankProvisionAdapter::new();
        let (source, metric, unit) = adapter.identity();
        assert_eq!(source, DataSource::BankProvision);
        assert_eq!(metric, "provision_ratio");
        assert_eq!(unit, Unit::Ratio);
    }

    #[test]
    fn ratio_guards_against_zero_total_loans() {
        let extract = ProvisionExtract {
            bank_id: "b".to_string(),
            filing_period: "2026Q1".to_string(),
            provision_for_credit_losses: 10.0,
            total_loans: 0.0,
        };
        assert_eq!(BankProvisionAdapter::ratio(&extract), None);
    }
}
