//! Core data model (spec.md §3): MetricPoint, ScraperResult, ValidationReport,
//! CacheEntry, AlertConfig, AlertInstance.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the four tracked boom/bust indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    BondIssuance,
    BdcDiscount,
    CreditFund,
    BankProvision,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BondIssuance => "bond_issuance",
            Self::BdcDiscount => "bdc_discount",
            Self::CreditFund => "credit_fund",
            Self::BankProvision => "bank_provision",
        }
    }

    /// Nominal cadence, used for the stale-data indicator (spec.md §7).
    pub fn nominal_cadence(&self) -> chrono::Duration {
        match self {
            Self::BdcDiscount => chrono::Duration::days(1),
            Self::BondIssuance => chrono::Duration::weeks(1),
            Self::CreditFund | Self::BankProvision => chrono::Duration::days(91),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Currency,
    Percent,
    Ratio,
    Count,
}

/// A metric's value: a bare decimal, or a composite of named components
/// (e.g. a filing with several extracted scalars).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    Scalar(f64),
    Composite(BTreeMap<String, f64>),
}

impl MetricValue {
    /// A representative scalar for cross-validation and anomaly detection.
    /// Composite values use their `primary` key if present, else the mean
    /// of all components.
    pub fn representative(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Composite(map) => {
                if let Some(v) = map.get("primary") {
                    return Some(*v);
                }
                if map.is_empty() {
                    return None;
                }
                Some(map.values().sum::<f64>() / map.len() as f64)
            }
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Self::Scalar(v) => v.is_finite(),
            Self::Composite(map) => map.values().all(|v| v.is_finite()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Degraded,
}

/// The atomic persisted record (spec.md §3). Construction is restricted to
/// `MetricPoint::new` so a rejected reading can never become one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub data_source: DataSource,
    pub metric_name: String,
    pub value: MetricValue,
    pub unit: Unit,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    pub checksum: String,
    pub anomaly_score: f64,
    pub metadata: BTreeMap<String, String>,
    pub source_flags: BTreeSet<String>,
    pub validation_status: ValidationStatus,
}

impl MetricPoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        data_source: DataSource,
        metric_name: impl Into<String>,
        value: MetricValue,
        unit: Unit,
        timestamp: DateTime<Utc>,
        confidence: f64,
        checksum: String,
        anomaly_score: f64,
        metadata: BTreeMap<String, String>,
        source_flags: BTreeSet<String>,
        validation_status: ValidationStatus,
    ) -> Self {
        Self {
            data_source,
            metric_name: metric_name.into(),
            value,
            unit,
            timestamp,
            confidence: confidence.clamp(0.0, 1.0),
            checksum,
            anomaly_score: anomaly_score.clamp(0.0, 1.0),
            metadata,
            source_flags,
            validation_status,
        }
    }

    pub fn key(&self) -> String {
        format!("{}#{}", self.data_source.as_str(), self.metric_name)
    }
}

/// A runner's output for one invocation (spec.md §3).
#[derive(Debug, Clone)]
pub struct ScraperResult {
    pub success: bool,
    pub metric_point: Option<MetricPoint>,
    pub error: Option<String>,
    pub execution_duration: std::time::Duration,
    pub retry_count: u32,
    pub used_fallback: bool,
}

/// Produced by the Validator; lives only within one runner invocation.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub confidence: f64,
    pub anomaly_score: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub checksum: String,
}

/// `{key, payload, writtenAt, ttl}` (spec.md §3).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    pub written_at: DateTime<Utc>,
    pub ttl: std::time::Duration,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = now - self.written_at;
        age.to_std().map(|a| a <= self.ttl).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdType {
    Absolute,
    PercentageChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    Email,
    Slack,
    Telegram,
    Sms,
    Webhook,
    Dashboard,
}

/// Per-user rule, read-only to the core (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub id: String,
    pub user_id: String,
    pub data_source: DataSource,
    pub metric_name: String,
    pub threshold_type: ThresholdType,
    pub threshold_value: f64,
    pub comparison_period_days: Option<u32>,
    pub enabled: bool,
    pub channels: Vec<AlertChannel>,
    pub dedup_window: std::time::Duration,
}

impl AlertConfig {
    /// Invariant: `comparisonPeriodDays >= 1` when thresholdType=percentage_change.
    pub fn is_well_formed(&self) -> bool {
        match self.threshold_type {
            ThresholdType::PercentageChange => {
                self.comparison_period_days.map(|d| d >= 1).unwrap_or(false)
            }
            ThresholdType::Absolute => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Informational,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub channel: AlertChannel,
    pub success: bool,
    pub detail: Option<String>,
}

/// Created by the Alert Engine (spec.md §3).
#[derive(Debug, Clone)]
pub struct AlertInstance {
    pub id: String,
    pub config_id: String,
    pub triggered_at: DateTime<Utc>,
    pub observed_value: f64,
    pub comparison_value: Option<f64>,
    pub severity: Severity,
    pub delivery_attempts: Vec<DeliveryAttempt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representative_prefers_primary_key() {
        let mut map = BTreeMap::new();
        map.insert("primary".to_string(), 5.0);
        map.insert("secondary".to_string(), 9.0);
        let v = MetricValue::Composite(map);
        assert_eq!(v.representative(), Some(5.0));
    }

    #[test]
    fn representative_averages_when_no_primary() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), 2.0);
        map.insert("b".to_string(), 4.0);
        let v = MetricValue::Composite(map);
        assert_eq!(v.representative(), Some(3.0));
    }

    #[test]
    fn metric_point_clamps_confidence_and_anomaly() {
        let point = MetricPoint::new(
            DataSource::BdcDiscount,
            "avg_discount",
            MetricValue::Scalar(0.1),
            Unit::Percent,
            Utc::now(),
            1.5,
            "deadbeef".to_string(),
            -0.2,
            BTreeMap::new(),
            BTreeSet::new(),
            ValidationStatus::Valid,
        );
        assert_eq!(point.confidence, 1.0);
        assert_eq!(point.anomaly_score, 0.0);
    }

    #[test]
    fn percentage_change_without_period_is_malformed() {
        let cfg = AlertConfig {
            id: "a".into(),
            user_id: "u".into(),
            data_source: DataSource::BondIssuance,
            metric_name: "weekly_total".into(),
            threshold_type: ThresholdType::PercentageChange,
            threshold_value: 0.1,
            comparison_period_days: None,
            enabled: true,
            channels: vec![AlertChannel::Email],
            dedup_window: std::time::Duration::from_secs(6 * 3600),
        };
        assert!(!cfg.is_well_formed());
    }
}
