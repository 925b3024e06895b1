//! CLI entry point (spec.md §6): `run`, `run-all`, `serve`, `validate-config`.
//!
//! Grounded on the teacher's `src/bin/route_quality_monitor.rs`
//! `clap::Parser`-derive CLI shape and `tracing_subscriber::fmt`
//! initialization convention.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use boom_bust_scraper::adapter::{EnvSecretStore, FetchContext, SourceAdapter};
use boom_bust_scraper::adapters::{BankProvisionAdapter, BdcDiscountAdapter, BondIssuanceAdapter, CreditFundAdapter};
use boom_bust_scraper::cache::SqliteCacheStore;
use boom_bust_scraper::config::Config;
use boom_bust_scraper::lease::LeaseTable;
use boom_bust_scraper::metrics_sink::MetricsSink;
use boom_bust_scraper::runner::{RunOutcome, ScraperRunner};
use boom_bust_scraper::scheduler::{ScheduledAdapter, Scheduler};
use boom_bust_scraper::state_store::SqliteStateStore;

#[derive(Parser)]
#[command(name = "scraper", about = "Boom/bust macro signal scraper")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single adapter synchronously.
    Run { source: String, metric: String },
    /// Run every registered adapter synchronously.
    RunAll,
    /// Run the scheduler loop forever.
    Serve,
    /// Validate configuration and exit.
    ValidateConfig,
}

const EXIT_SUCCESS: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_PARTIAL_SUCCESS: u8 = 3;
const EXIT_ALL_FAILED: u8 = 4;

fn registered_adapters() -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(BondIssuanceAdapter::new()),
        Arc::new(BdcDiscountAdapter::new()),
        Arc::new(CreditFundAdapter::new()),
        Arc::new(BankProvisionAdapter::new()),
    ]
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let secrets = Arc::new(EnvSecretStore::new());
    let ctx = match FetchContext::new(secrets) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to build fetch context");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let cache = match SqliteCacheStore::open(&config.cache_store_path) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to open cache store");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let state_store = match SqliteStateStore::open(&config.state_store_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to open state store");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let runner = Arc::new(ScraperRunner::new(LeaseTable::new(), cache, state_store));
    let metrics_sink = MetricsSink::new(ctx.client.clone(), config.metrics_sink_endpoint.clone());

    match cli.command {
        Command::ValidateConfig => {
            info!("configuration valid");
            ExitCode::from(EXIT_SUCCESS)
        }
        Command::Run { source, metric } => {
            let Some(adapter) = registered_adapters()
                .into_iter()
                .find(|a| a.identity().0.as_str() == source && a.identity().1 == metric)
            else {
                error!(source, metric, "no adapter registered for this source/metric");
                return ExitCode::from(EXIT_CONFIG_ERROR);
            };
            let outcome = runner.run(adapter.as_ref(), &ctx).await;
            if let RunOutcome::Completed(result) = &outcome {
                metrics_sink.report(&source, result).await;
            }
            match outcome {
                RunOutcome::Completed(result) if result.success => ExitCode::from(EXIT_SUCCESS),
                _ => ExitCode::from(EXIT_ALL_FAILED),
            }
        }
        Command::RunAll => {
            let adapters = registered_adapters();
            let mut successes = 0;
            let mut failures = 0;
            for adapter in &adapters {
                let (source, _, _) = adapter.identity();
                let outcome = runner.run(adapter.as_ref(), &ctx).await;
                if let RunOutcome::Completed(result) = &outcome {
                    metrics_sink.report(source.as_str(), result).await;
                    if result.success {
                        successes += 1;
                    } else {
                        failures += 1;
                    }
                }
            }
            if failures == 0 {
                ExitCode::from(EXIT_SUCCESS)
            } else if successes == 0 {
                ExitCode::from(EXIT_ALL_FAILED)
            } else {
                ExitCode::from(EXIT_PARTIAL_SUCCESS)
            }
        }
        Command::Serve => {
            let scheduler = Arc::new(Scheduler::new(runner, ctx));
            let mut handles = Vec::new();
            for adapter in registered_adapters() {
                let cadence = adapter.identity().0.nominal_cadence();
                let scheduler = Arc::clone(&scheduler);
                handles.push(tokio::spawn(async move {
                    scheduler.run_forever(ScheduledAdapter { adapter, cadence }).await
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }
            ExitCode::from(EXIT_SUCCESS)
        }
    }
}
