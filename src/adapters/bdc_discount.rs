//! BDC discount-to-NAV adapter (spec.md §2: `bdc_discount` / `avg_discount`).
//!
//! Primary computes `(price - nav) / nav` averaged across a basket of
//! exchange-listed BDCs; the secondary corroborates against an independent
//! data vendor's own published discount figure.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::adapter::{FetchContext, RawReading, SourceAdapter};
use crate::error::ScraperError;
use crate::models::{DataSource, MetricValue, Unit};
use crate::validator::Schema;

const PRIMARY_ENDPOINT_SECRET: &str = "BDC_DISCOUNT_PRIMARY_URL";
const SECONDARY_ENDPOINT_SECRET: &str = "BDC_DISCOUNT_SECONDARY_URL";

#[derive(Debug, Deserialize)]
struct BdcQuote {
    ticker: String,
    price: f64,
    nav_per_share: f64,
}

#[derive(Debug, Deserialize)]
struct BdcBasketResponse {
    quotes: Vec<BdcQuote>,
}

#[derive(Debug, Deserialize)]
struct AggregateDiscountResponse {
    average_discount: f64,
}

pub struct BdcDiscountAdapter;

impl BdcDiscountAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BdcDiscountAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for BdcDiscountAdapter {
    fn identity(&self) -> (DataSource, &str, Unit) {
        (DataSource::BdcDiscount, "avg_discount", Unit::Percent)
    }

    fn preferred_cache_ttl(&self) -> Duration {
        Duration::from_secs(3600)
    }

    fn schema(&self) -> Schema {
        Schema {
            min: -1.0,
            max: 1.0,
            required_metadata_fields: vec!["constituent_count".to_string()],
            expected_composite_cardinality: None,
        }
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<RawReading, ScraperError> {
        let url = ctx
            .secrets
            .get(PRIMARY_ENDPOINT_SECRET)
            .ok_or_else(|| ScraperError::auth_config("bdc_discount", "missing primary endpoint"))?;
        let response = ctx
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ScraperError::transport("bdc_discount", e.to_string()))?;
        if !response.status().is_success() {
            return Err(ScraperError::transport(
                "bdc_discount",
                format!("endpoint returned {}", response.status()),
            ));
        }
        let body: BdcBasketResponse = response
            .json()
            .await
            .map_err(|e| ScraperError::parse_schema("bdc_discount", e.to_string()))?;
        if body.quotes.is_empty() {
            return Err(ScraperError::parse_schema("bdc_discount", "empty basket"));
        }

        let discounts: Vec<f64> = body
            .quotes
            .iter()
            .filter(|q| q.nav_per_share != 0.0)
            .map(|q| (q.price - q.nav_per_share) / q.nav_per_share)
            .collect();
        let average = discounts.iter().sum::<f64>() / discounts.len() as f64;

        let mut metadata = BTreeMap::new();
        metadata.insert("constituent_count".to_string(), body.quotes.len().to_string());
        metadata.insert(
            "tickers".to_string(),
            body.quotes.iter().map(|q| q.ticker.clone()).collect::<Vec<_>>().join(","),
        );

        Ok(RawReading {
            value: MetricValue::Scalar(average),
            metadata,
            source_flag: "bdc_basket_primary".to_string(),
        })
    }

    async fn secondary_sources(&self, ctx: &FetchContext) -> Vec<RawReading> {
        let Some(url) = ctx.secrets.get(SECONDARY_ENDPOINT_SECRET) else {
            return Vec::new();
        };
        let result: Result<AggregateDiscountResponse, ScraperError> = async {
            let response = ctx
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| ScraperError::transport("bdc_discount", e.to_string()))?;
            response
                .json()
                .await
                .map_err(|e| ScraperError::parse_schema("bdc_discount", e.to_string()))
        }
        .await;

        match result {
            Ok(body) => vec![RawReading {
                value: MetricValue::Scalar(body.average_discount),
                metadata: BTreeMap::new(),
                source_flag: "vendor_aggregate".to_string(),
            }],
            Err(_) => Vec::new(),
        }
    }
}
