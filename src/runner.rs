//! Scraper Runner (spec.md §4.7): orchestrates retry, validation,
//! cross-validation, and persistence for one adapter invocation.
//!
//! The state machine (`RunState`) and the overall "acquire lease, do the
//! work, release on drop" shape is grounded on
//! `scrapers/binance_session.rs`'s `SessionState` machine and the
//! surrounding reconnect orchestration in the same file.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::adapter::{FetchContext, RawReading, SourceAdapter};
use crate::cache::{CacheLookup, CacheStore};
use crate::cross_validator::CrossValidator;
use crate::error::ScraperError;
use crate::lease::LeaseTable;
use crate::models::{MetricPoint, ScraperResult, ValidationStatus};
use crate::retry::{execute_with_retry, RetryPolicy};
use crate::state_store::StateStore;
use crate::validator::DataValidator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Validating,
    FallingBack,
    Persisting,
    Done,
    Failed,
}

pub enum RunOutcome {
    Completed(ScraperResult),
    /// A lease was already held for this `(dataSource, metricName)`.
    Skipped,
}

pub struct ScraperRunner {
    pub lease_table: Arc<LeaseTable>,
    pub cache: Arc<dyn CacheStore>,
    pub state_store: Arc<dyn StateStore>,
    pub retry_policy: RetryPolicy,
    pub secondary_timeout: Duration,
}

impl ScraperRunner {
    pub fn new(
        lease_table: Arc<LeaseTable>,
        cache: Arc<dyn CacheStore>,
        state_store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            lease_table,
            cache,
            state_store,
            retry_policy: RetryPolicy::default(),
            secondary_timeout: Duration::from_secs(5),
        }
    }

    pub async fn run(&self, adapter: &dyn SourceAdapter, ctx: &FetchContext) -> RunOutcome {
        let (data_source, metric_name, unit) = adapter.identity();
        let metric_name = metric_name.to_string();
        let key = format!("{}#{}", data_source.as_str(), metric_name);

        let Some(_lease) = self.lease_table.try_acquire(data_source, &metric_name) else {
            info!(data_source = data_source.as_str(), metric_name, "run skipped, lease held");
            return RunOutcome::Skipped;
        };

        let start = Instant::now();
        let mut state;
        macro_rules! transition {
            ($to:expr) => {{
                state = $to;
                tracing::debug!(data_source = data_source.as_str(), metric_name, state = ?state, "run state transition");
            }};
        }
        transition!(RunState::Fetching);
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let mut used_fallback = false;

        let fetch_result = execute_with_retry(&self.retry_policy, "fetch", || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            adapter.fetch(ctx)
        })
        .await;
        let retry_count = attempts.load(std::sync::atomic::Ordering::SeqCst).saturating_sub(1);

        let raw = match fetch_result {
            Ok(reading) => reading,
            Err(primary_err) => {
                transition!(RunState::FallingBack);
                match adapter.fallback(ctx).await {
                    Some(reading) => {
                        used_fallback = true;
                        reading
                    }
                    None => {
                        return self
                            .degrade_or_fail(data_source, &metric_name, &key, start, retry_count, primary_err)
                            .await
                    }
                }
            }
        };

        transition!(RunState::Validating);

        let secondaries = tokio::time::timeout(self.secondary_timeout, adapter.secondary_sources(ctx))
            .await
            .unwrap_or_default();

        let history = self.state_store.get_range(&key, Utc::now() - chrono::Duration::days(90), Utc::now()).unwrap_or_default();
        let schema = adapter.schema();
        let report = DataValidator::validate(&raw.value, &raw.metadata, &schema, &history);

        if !report.valid {
            warn!(
                data_source = data_source.as_str(),
                metric_name,
                errors = ?report.errors,
                "validator rejected reading"
            );
            return RunOutcome::Completed(ScraperResult {
                success: false,
                metric_point: None,
                error: Some(report.errors.join("; ")),
                execution_duration: start.elapsed(),
                retry_count,
                used_fallback,
            });
        }

        let mut confidence = report.confidence;
        let mut source_flags: BTreeSet<String> = BTreeSet::new();
        source_flags.insert(raw.source_flag.clone());

        let secondary_values: Vec<f64> = secondaries
            .iter()
            .filter_map(|r: &RawReading| r.value.representative())
            .collect();
        for r in &secondaries {
            source_flags.insert(r.source_flag.clone());
        }
        if let Some(primary_value) = raw.value.representative() {
            let outcome = CrossValidator::cross_validate(primary_value, &secondary_values, unit);
            if outcome.agreement_confidence < 0.5 {
                confidence = confidence.min(0.5);
                warn!(
                    data_source = data_source.as_str(),
                    metric_name,
                    agreement_confidence = outcome.agreement_confidence,
                    "cross-validation disagreement, confidence capped at 0.5"
                );
            }
        }

        transition!(RunState::Persisting);
        let validation_status = if used_fallback || confidence < 0.5 {
            ValidationStatus::Degraded
        } else {
            ValidationStatus::Valid
        };

        let point = MetricPoint::new(
            data_source,
            metric_name.clone(),
            raw.value.clone(),
            unit,
            Utc::now(),
            confidence,
            report.checksum.clone(),
            report.anomaly_score,
            raw.metadata.clone(),
            source_flags,
            validation_status,
        );

        if let Ok(payload) = serde_json::to_vec(&point) {
            if let Err(e) = self.cache.put(&key, &payload, adapter.preferred_cache_ttl()) {
                warn!(data_source = data_source.as_str(), metric_name, error = %e, "cache put failed");
            }
        }
        if let Err(e) = self.state_store.put(point.clone()) {
            transition!(RunState::Failed);
            return RunOutcome::Completed(ScraperResult {
                success: false,
                metric_point: None,
                error: Some(e.to_string()),
                execution_duration: start.elapsed(),
                retry_count,
                used_fallback,
            });
        }

        transition!(RunState::Done);
        RunOutcome::Completed(ScraperResult {
            success: true,
            metric_point: Some(point),
            error: None,
            execution_duration: start.elapsed(),
            retry_count,
            used_fallback,
        })
    }

    /// Cache.getStale, then StateStore.getLastKnownGood, then failure
    /// (spec.md §4.7 step 3, second half).
    async fn degrade_or_fail(
        &self,
        data_source: crate::models::DataSource,
        metric_name: &str,
        key: &str,
        start: Instant,
        retry_count: u32,
        primary_err: ScraperError,
    ) -> RunOutcome {
        if let Ok(CacheLookup::Hit(bytes)) = self.cache.get_stale(key) {
            if let Ok(mut point) = serde_json::from_slice::<MetricPoint>(&bytes) {
                point.validation_status = ValidationStatus::Degraded;
                point.timestamp = Utc::now();
                return RunOutcome::Completed(ScraperResult {
                    success: true,
                    metric_point: Some(point),
                    error: None,
                    execution_duration: start.elapsed(),
                    retry_count,
                    used_fallback: true,
                });
            }
        }

        if let Ok(Some(mut point)) = self.state_store.get_last_known_good(key) {
            point.confidence *= 0.5;
            point.validation_status = ValidationStatus::Degraded;
            return RunOutcome::Completed(ScraperResult {
                success: true,
                metric_point: Some(point),
                error: None,
                execution_duration: start.elapsed(),
                retry_count,
                used_fallback: true,
            });
        }

        warn!(
            data_source = data_source.as_str(),
            metric_name,
            error = %primary_err,
            "run failed: fetch, fallback, cache, and last-known-good all exhausted"
        );
        RunOutcome::Completed(ScraperResult {
            success: false,
            metric_point: None,
            error: Some(primary_err.to_string()),
            execution_duration: start.elapsed(),
            retry_count,
            used_fallback: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{EnvSecretStore, FetchContext};
    use crate::cache::SqliteCacheStore;
    use crate::models::{DataSource, MetricValue, Unit};
    use crate::state_store::SqliteStateStore;
    use crate::validator::Schema;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyAdapter {
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl SourceAdapter for FlakyAdapter {
        fn identity(&self) -> (DataSource, &str, Unit) {
            (DataSource::BdcDiscount, "avg_discount", Unit::Percent)
        }

        fn schema(&self) -> Schema {
            Schema::unbounded()
        }

        async fn fetch(&self, _ctx: &FetchContext) -> Result<RawReading, ScraperError> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(ScraperError::transport("flaky", "timeout"));
            }
            Ok(RawReading {
                value: MetricValue::Scalar(0.105),
                metadata: BTreeMap::new(),
                source_flag: "test_source".to_string(),
            })
        }

        async fn fallback(&self, _ctx: &FetchContext) -> Option<RawReading> {
            None
        }
    }

    fn make_runner() -> ScraperRunner {
        ScraperRunner::new(
            LeaseTable::new(),
            Arc::new(SqliteCacheStore::in_memory().unwrap()),
            Arc::new(SqliteStateStore::in_memory().unwrap()),
        )
    }

    fn make_ctx() -> FetchContext {
        FetchContext::new(Arc::new(EnvSecretStore::new())).unwrap()
    }

    #[tokio::test]
    async fn successful_run_persists_a_valid_point() {
        let runner = make_runner();
        let ctx = make_ctx();
        let adapter = FlakyAdapter { fail_times: AtomicU32::new(0) };

        match runner.run(&adapter, &ctx).await {
            RunOutcome::Completed(result) => {
                assert!(result.success);
                let point = result.metric_point.unwrap();
                assert_eq!(point.validation_status, ValidationStatus::Valid);
            }
            RunOutcome::Skipped => panic!("unexpected skip"),
        }
    }

    #[tokio::test]
    async fn overlapping_run_on_same_metric_is_skipped() {
        let runner = make_runner();
        let ctx = make_ctx();
        let adapter = FlakyAdapter { fail_times: AtomicU32::new(0) };

        let _guard = runner
            .lease_table
            .try_acquire(DataSource::BdcDiscount, "avg_discount")
            .unwrap();

        match runner.run(&adapter, &ctx).await {
            RunOutcome::Skipped => {}
            RunOutcome::Completed(_) => panic!("expected skip while lease held"),
        }
    }

    #[tokio::test]
    async fn exhausted_fetch_with_no_fallback_and_no_cache_fails() {
        let runner = make_runner();
        let ctx = make_ctx();
        let adapter = FlakyAdapter { fail_times: AtomicU32::new(10) };

        match runner.run(&adapter, &ctx).await {
            RunOutcome::Completed(result) => assert!(!result.success),
            RunOutcome::Skipped => panic!("unexpected skip"),
        }
    }
}
