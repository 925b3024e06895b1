//! Scheduler / Trigger (spec.md §4.9): cadence-driven ticks per adapter, plus
//! on-demand invocation.
//!
//! Grounded on the teacher's `main.rs` service loop (`tokio::time::interval`
//! combined with `tokio::select!`) generalized from a single trading loop to
//! one tick task per registered adapter, with the jitter convention lifted
//! from `scrapers/binance_session.rs::BackoffCalculator` so concurrently
//! scheduled adapters don't wake in lockstep.

use std::sync::Arc;

use rand::Rng;
use tracing::{info, warn};

use crate::adapter::{FetchContext, SourceAdapter};
use crate::runner::{RunOutcome, ScraperRunner};

/// Jitter applied to each cadence tick, +/-5% (spec.md §4.9).
const CADENCE_JITTER: f64 = 0.05;

pub struct ScheduledAdapter {
    pub adapter: Arc<dyn SourceAdapter>,
    pub cadence: chrono::Duration,
}

pub struct Scheduler {
    runner: Arc<ScraperRunner>,
    ctx: FetchContext,
}

impl Scheduler {
    pub fn new(runner: Arc<ScraperRunner>, ctx: FetchContext) -> Self {
        Self { runner, ctx }
    }

    fn jittered_cadence(cadence: chrono::Duration) -> std::time::Duration {
        let base = cadence.to_std().unwrap_or(std::time::Duration::from_secs(3600));
        let factor = rand::thread_rng().gen_range((1.0 - CADENCE_JITTER)..=(1.0 + CADENCE_JITTER));
        std::time::Duration::from_secs_f64(base.as_secs_f64() * factor)
    }

    /// Runs one adapter on its cadence forever. A tick that finds the
    /// previous run still holding its lease logs "overlap-skipped" rather
    /// than queuing — the next tick simply tries again (spec.md §4.9).
    pub async fn run_forever(&self, scheduled: ScheduledAdapter) -> ! {
        loop {
            let sleep_for = Self::jittered_cadence(scheduled.cadence);
            tokio::time::sleep(sleep_for).await;
            self.tick(scheduled.adapter.as_ref()).await;
        }
    }

    /// Runs one adapter immediately, independent of its cadence (on-demand
    /// invocation, spec.md §4.9 / §6 CLI `run` subcommand).
    pub async fn trigger_now(&self, adapter: &dyn SourceAdapter) -> RunOutcome {
        self.tick(adapter).await
    }

    async fn tick(&self, adapter: &dyn SourceAdapter) -> RunOutcome {
        let (data_source, metric_name, _unit) = adapter.identity();
        let outcome = self.runner.run(adapter, &self.ctx).await;
        match &outcome {
            RunOutcome::Skipped => {
                warn!(
                    data_source = data_source.as_str(),
                    metric_name, "overlap-skipped"
                );
            }
            RunOutcome::Completed(result) if result.success => {
                info!(
                    data_source = data_source.as_str(),
                    metric_name,
                    retry_count = result.retry_count,
                    used_fallback = result.used_fallback,
                    "scheduled run completed"
                );
            }
            RunOutcome::Completed(result) => {
                warn!(
                    data_source = data_source.as_str(),
                    metric_name,
                    error = ?result.error,
                    "scheduled run failed"
                );
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_cadence_stays_within_five_percent() {
        let cadence = chrono::Duration::days(1);
        for _ in 0..50 {
            let jittered = Scheduler::jittered_cadence(cadence);
            let base = 24.0 * 3600.0;
            let ratio = jittered.as_secs_f64() / base;
            assert!((0.94..=1.06).contains(&ratio), "ratio={ratio}");
        }
    }
}
