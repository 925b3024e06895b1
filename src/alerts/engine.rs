//! Alert Engine (spec.md §4.8): threshold evaluation, dedup, dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alerts::channels::{AlertPayload, Notifier};
use crate::models::{
    AlertConfig, AlertInstance, DeliveryAttempt, MetricPoint, Severity, ThresholdType,
};
use crate::retry::{execute_with_retry, RetryPolicy};
use crate::state_store::StateStore;

/// Hysteresis rearm fraction: the value must retreat by at least 20% of the
/// threshold distance before an `absolute` alert can fire again (spec.md §4.8).
const HYSTERESIS_REARM_FRACTION: f64 = 0.20;
/// Below this confidence, alerts are downgraded and suppressed from sms/telegram.
const CONFIDENCE_INFORMATIONAL_THRESHOLD: f64 = 0.5;

#[derive(Clone, Copy)]
struct HysteresisState {
    /// `true` once the value has retreated far enough to fire again.
    armed: bool,
}

struct DedupEntry {
    instance: AlertInstance,
}

pub struct AlertEngine {
    notifiers: HashMap<&'static str, Arc<dyn Notifier>>,
    dedup: Mutex<HashMap<String, DedupEntry>>,
    hysteresis: Mutex<HashMap<String, HysteresisState>>,
    retry_policy: RetryPolicy,
}

fn channel_key(channel: crate::models::AlertChannel) -> &'static str {
    use crate::models::AlertChannel::*;
    match channel {
        Email => "email",
        Slack => "slack",
        Telegram => "telegram",
        Sms => "sms",
        Webhook => "webhook",
        Dashboard => "dashboard",
    }
}

impl AlertEngine {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        let mut map = HashMap::new();
        for notifier in notifiers {
            map.insert(channel_key(notifier.channel()), notifier);
        }
        Self {
            notifiers: map,
            dedup: Mutex::new(HashMap::new()),
            hysteresis: Mutex::new(HashMap::new()),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Evaluate every enabled config matching the point's `(dataSource,
    /// metricName)` and dispatch firings. Returns the instances produced
    /// this call (including dedup-suppressed updates, for observability).
    pub async fn evaluate(
        &self,
        configs: &[AlertConfig],
        point: &MetricPoint,
        state_store: &dyn StateStore,
    ) -> Vec<AlertInstance> {
        let mut produced = Vec::new();
        let Some(value) = point.value.representative() else {
            return produced;
        };

        for config in configs {
            if !config.enabled
                || config.data_source != point.data_source
                || config.metric_name != point.metric_name
            {
                continue;
            }

            let firing = match config.threshold_type {
                ThresholdType::Absolute => self.evaluate_absolute(config, value, point, state_store),
                ThresholdType::PercentageChange => {
                    self.evaluate_percentage_change(config, value, point, state_store)
                }
            };

            let Some((comparison_value, mut severity)) = firing else {
                continue;
            };

            if point.confidence < CONFIDENCE_INFORMATIONAL_THRESHOLD {
                severity = Severity::Informational;
            }

            if let Some(instance) = self.dedup_and_record(config, value, comparison_value, severity, point.timestamp)
            {
                if instance.delivery_attempts.is_empty() {
                    // Freshly created (not a dedup update): dispatch.
                    let instance = self.dispatch(config, &instance, point).await;
                    produced.push(instance);
                } else {
                    produced.push(instance);
                }
            }
        }

        produced
    }

    fn evaluate_absolute(
        &self,
        config: &AlertConfig,
        value: f64,
        point: &MetricPoint,
        state_store: &dyn StateStore,
    ) -> Option<(Option<f64>, Severity)> {
        let key = point.key();
        let history = state_store
            .get_range(&key, point.timestamp - chrono::Duration::days(30), point.timestamp)
            .unwrap_or_default();
        let previous = history
            .iter()
            .rfind(|p| p.timestamp < point.timestamp)
            .and_then(|p| p.value.representative());

        let direction_positive = match previous {
            Some(prev) => value >= prev,
            None => true,
        };

        let crossed = match previous {
            Some(prev) => {
                if direction_positive {
                    prev < config.threshold_value && value >= config.threshold_value
                } else {
                    prev > config.threshold_value && value <= config.threshold_value
                }
            }
            None => {
                if direction_positive {
                    value >= config.threshold_value
                } else {
                    value <= config.threshold_value
                }
            }
        };

        if !crossed {
            return None;
        }

        let mut hysteresis = self.hysteresis.lock();
        let state = hysteresis
            .entry(config.id.clone())
            .or_insert(HysteresisState { armed: true });
        if !state.armed {
            let rearm_distance = HYSTERESIS_REARM_FRACTION * config.threshold_value.abs();
            let retreated = (value - config.threshold_value).abs() >= rearm_distance;
            if !retreated {
                return None;
            }
        }
        state.armed = false;

        let overshoot = (value - config.threshold_value).abs();
        let severity = if overshoot >= config.threshold_value.abs() * 0.5 {
            Severity::Critical
        } else {
            Severity::Warning
        };

        Some((Some(config.threshold_value), severity))
    }

    fn evaluate_percentage_change(
        &self,
        config: &AlertConfig,
        value: f64,
        point: &MetricPoint,
        state_store: &dyn StateStore,
    ) -> Option<(Option<f64>, Severity)> {
        let period_days = config.comparison_period_days?;
        let key = point.key();
        let cutoff = point.timestamp - chrono::Duration::days(period_days as i64);
        let history = state_store
            .get_range(&key, cutoff - chrono::Duration::days(1), cutoff)
            .unwrap_or_default();
        let baseline = history.last().and_then(|p| p.value.representative())?;

        if baseline == 0.0 {
            return None;
        }
        let delta = (value - baseline) / baseline;
        if delta.abs() < config.threshold_value {
            return None;
        }
        let severity = if delta.abs() >= config.threshold_value * 2.0 {
            Severity::Critical
        } else {
            Severity::Warning
        };
        Some((Some(baseline), severity))
    }

    /// Dedup key is `(configId, truncate(triggeredAt, configDedupWindow))`
    /// (spec.md §3). Returns `Some` with an empty `delivery_attempts` for a
    /// fresh firing (caller should dispatch), or `Some` with attempts
    /// already populated for a dedup update (caller should not dispatch
    /// again — already appended to `produced` with its existing attempts).
    fn dedup_and_record(
        &self,
        config: &AlertConfig,
        observed_value: f64,
        comparison_value: Option<f64>,
        severity: Severity,
        triggered_at: DateTime<Utc>,
    ) -> Option<AlertInstance> {
        let mut dedup = self.dedup.lock();
        if let Some(entry) = dedup.get_mut(&config.id) {
            let age = triggered_at - entry.instance.triggered_at;
            if age.to_std().map(|a| a <= config.dedup_window).unwrap_or(false) {
                entry.instance.observed_value = observed_value;
                return Some(entry.instance.clone());
            }
        }

        let instance = AlertInstance {
            id: Uuid::new_v4().to_string(),
            config_id: config.id.clone(),
            triggered_at,
            observed_value,
            comparison_value,
            severity,
            delivery_attempts: Vec::new(),
        };
        dedup.insert(config.id.clone(), DedupEntry { instance: instance.clone() });
        Some(instance)
    }

    async fn dispatch(&self, config: &AlertConfig, instance: &AlertInstance, point: &MetricPoint) -> AlertInstance {
        let mut instance = instance.clone();
        let payload = AlertPayload {
            id: instance.id.clone(),
            triggered_at: instance.triggered_at,
            data_source: point.data_source.as_str().to_string(),
            metric_name: point.metric_name.clone(),
            observed_value: instance.observed_value,
            baseline_value: instance.comparison_value,
            threshold: config.threshold_value,
            severity: AlertPayload::severity_str(instance.severity).to_string(),
            message: format!(
                "{} {} crossed threshold {}",
                point.data_source.as_str(),
                point.metric_name,
                config.threshold_value
            ),
        };

        for &channel in &config.channels {
            if instance.severity == Severity::Informational
                && matches!(channel, crate::models::AlertChannel::Sms | crate::models::AlertChannel::Telegram)
            {
                continue;
            }
            let Some(notifier) = self.notifiers.get(channel_key(channel)) else {
                continue;
            };
            let result = execute_with_retry(&self.retry_policy, channel_key(channel), || notifier.send(&payload)).await;
            let success = result.is_ok();
            if let Err(e) = &result {
                warn!(channel = channel_key(channel), error = %e, "alert dispatch failed");
            } else {
                info!(channel = channel_key(channel), config_id = %config.id, "alert dispatched");
            }
            instance.delivery_attempts.push(DeliveryAttempt {
                channel,
                success,
                detail: result.err().map(|e| e.to_string()),
            });
        }

        let mut dedup = self.dedup.lock();
        if let Some(entry) = dedup.get_mut(&config.id) {
            entry.instance = instance.clone();
        }
        instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertChannel, DataSource, MetricValue, Unit, ValidationStatus};
    use crate::state_store::SqliteStateStore;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingNotifier {
        channel: AlertChannel,
        count: AtomicU32,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        fn channel(&self) -> AlertChannel {
            self.channel
        }

        async fn send(&self, _payload: &AlertPayload) -> Result<(), crate::error::ScraperError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn point(value: f64, timestamp: DateTime<Utc>, confidence: f64) -> MetricPoint {
        MetricPoint::new(
            DataSource::BdcDiscount,
            "avg_discount",
            MetricValue::Scalar(value),
            Unit::Percent,
            timestamp,
            confidence,
            "x".to_string(),
            0.0,
            BTreeMap::new(),
            BTreeSet::new(),
            ValidationStatus::Valid,
        )
    }

    fn config(threshold: f64) -> AlertConfig {
        AlertConfig {
            id: "cfg-1".to_string(),
            user_id: "user-1".to_string(),
            data_source: DataSource::BdcDiscount,
            metric_name: "avg_discount".to_string(),
            threshold_type: ThresholdType::Absolute,
            threshold_value: threshold,
            comparison_period_days: None,
            enabled: true,
            channels: vec![AlertChannel::Email],
            dedup_window: std::time::Duration::from_secs(6 * 3600),
        }
    }

    #[tokio::test]
    async fn absolute_threshold_crossing_fires_once() {
        let notifier = Arc::new(CountingNotifier {
            channel: AlertChannel::Email,
            count: AtomicU32::new(0),
        });
        let engine = AlertEngine::new(vec![notifier.clone()]);
        let store = SqliteStateStore::in_memory().unwrap();
        let cfg = config(0.10);
        let p = point(0.11, Utc::now(), 0.9);

        let instances = engine.evaluate(&[cfg], &p, &store).await;
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].observed_value, 0.11);
        assert_eq!(notifier.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn below_threshold_does_not_fire() {
        let engine = AlertEngine::new(vec![]);
        let store = SqliteStateStore::in_memory().unwrap();
        let cfg = config(0.20);
        let p = point(0.105, Utc::now(), 0.9);
        let instances = engine.evaluate(&[cfg], &p, &store).await;
        assert!(instances.is_empty());
    }

    #[tokio::test]
    async fn dedup_within_window_updates_observed_value_without_redispatch() {
        let notifier = Arc::new(CountingNotifier {
            channel: AlertChannel::Email,
            count: AtomicU32::new(0),
        });
        let engine = AlertEngine::new(vec![notifier.clone()]);
        let store = SqliteStateStore::in_memory().unwrap();
        let cfg = config(0.10);
        let t0 = Utc::now();

        let first = engine.evaluate(std::slice::from_ref(&cfg), &point(0.11, t0, 0.9), &store).await;
        // 0.15 clears the hysteresis rearm distance (20% of the 0.10 threshold,
        // i.e. 0.02) comfortably so the second firing isn't sensitive to float rounding.
        let second = engine
            .evaluate(std::slice::from_ref(&cfg), &point(0.15, t0 + chrono::Duration::minutes(10), 0.9), &store)
            .await;

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].id, second[0].id, "dedup update must reference the first instance's id");
        assert_eq!(second[0].observed_value, 0.15);
        assert_eq!(notifier.count.load(Ordering::SeqCst), 1, "only the first firing dispatches");
    }

    #[tokio::test]
    async fn low_confidence_alert_downgrades_and_suppresses_sms() {
        let email = Arc::new(CountingNotifier {
            channel: AlertChannel::Email,
            count: AtomicU32::new(0),
        });
        let sms = Arc::new(CountingNotifier {
            channel: AlertChannel::Sms,
            count: AtomicU32::new(0),
        });
        let engine = AlertEngine::new(vec![email.clone(), sms.clone()]);
        let store = SqliteStateStore::in_memory().unwrap();
        let mut cfg = config(0.10);
        cfg.channels = vec![AlertChannel::Email, AlertChannel::Sms];
        let p = point(0.11, Utc::now(), 0.3);

        let instances = engine.evaluate(&[cfg], &p, &store).await;
        assert_eq!(instances[0].severity, Severity::Informational);
        assert_eq!(email.count.load(Ordering::SeqCst), 1);
        assert_eq!(sms.count.load(Ordering::SeqCst), 0, "sms must be suppressed below confidence 0.5");
    }
}
