//! Source Adapter contract (spec.md §4.6).
//!
//! Adapters are pure consumers of a `FetchContext` (HTTP client, clock,
//! secret store) and never touch the StateStore, Cache, or Validator
//! directly — those are the Runner's job. Grounded on the teacher's
//! per-scraper `Client` field (`scrapers/polymarket_api.rs::
//! PolymarketScraper::client`) generalized into a shared context, and on
//! `scrapers/binance_session.rs::SessionConfig::from_env`'s env-var reading
//! convention for the secret store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ScraperError;
use crate::models::{DataSource, MetricValue, Unit};
use crate::validator::Schema;

#[derive(Debug, Clone)]
pub struct RawReading {
    pub value: MetricValue,
    pub metadata: BTreeMap<String, String>,
    /// Which collaborator produced this reading (spec.md §3 `sourceFlags`),
    /// e.g. `"sec_edgar"`, `"yahoo_finance"`.
    pub source_flag: String,
}

/// Read-through secret store cached with a 10-minute TTL (spec.md §5).
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

const SECRET_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

struct CachedSecret {
    value: Option<String>,
    fetched_at: Instant,
}

/// Reads secrets from the process environment, matching
/// `scrapers/binance_session.rs::SessionConfig::from_env`'s `std::env::var`
/// convention, with a read-through TTL cache layered on top.
pub struct EnvSecretStore {
    cache: Mutex<BTreeMap<String, CachedSecret>>,
}

impl Default for EnvSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(BTreeMap::new()),
        }
    }
}

impl SecretStore for EnvSecretStore {
    fn get(&self, key: &str) -> Option<String> {
        let mut cache = self.cache.lock();
        if let Some(entry) = cache.get(key) {
            if entry.fetched_at.elapsed() < SECRET_CACHE_TTL {
                return entry.value.clone();
            }
        }
        let value = std::env::var(key).ok();
        cache.insert(
            key.to_string(),
            CachedSecret {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );
        value
    }
}

/// Shared handle passed to every adapter invocation (spec.md §9: "Global
/// singletons... represent as a Context struct").
#[derive(Clone)]
pub struct FetchContext {
    pub client: reqwest::Client,
    pub secrets: Arc<dyn SecretStore>,
    pub fetch_timeout: Duration,
}

impl FetchContext {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Result<Self, ScraperError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ScraperError::transport("fetch_context", e.to_string()))?;
        Ok(Self {
            client,
            secrets,
            fetch_timeout: Duration::from_secs(30),
        })
    }
}

/// Contract every indicator implementation exposes (spec.md §4.6).
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn identity(&self) -> (DataSource, &str, Unit);

    /// Cache TTL and nominal cadence, used by the Runner and Scheduler.
    fn preferred_cache_ttl(&self) -> Duration {
        Duration::from_secs(3600)
    }

    /// Performs network I/O; may raise retryable or non-retryable errors.
    async fn fetch(&self, ctx: &FetchContext) -> Result<RawReading, ScraperError>;

    fn schema(&self) -> Schema;

    /// Zero or more corroborating fetches for cross-validation. Failures
    /// here never fail the run — the adapter itself swallows per-source
    /// errors and returns only the readings that succeeded.
    async fn secondary_sources(&self, ctx: &FetchContext) -> Vec<RawReading> {
        let _ = ctx;
        Vec::new()
    }

    /// Cheap alternative when primary exhausted retries. `None` means no
    /// fallback is available for this adapter.
    async fn fallback(&self, ctx: &FetchContext) -> Option<RawReading> {
        let _ = ctx;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_secret_store_reads_and_caches() {
        std::env::set_var("SCRAPER_TEST_SECRET", "shh");
        let store = EnvSecretStore::new();
        assert_eq!(store.get("SCRAPER_TEST_SECRET"), Some("shh".to_string()));
        std::env::remove_var("SCRAPER_TEST_SECRET");
        // Still cached within the TTL window even after removal.
        assert_eq!(store.get("SCRAPER_TEST_SECRET"), Some("shh".to_string()));
    }

    #[test]
    fn env_secret_store_missing_key_is_none() {
        let store = EnvSecretStore::new();
        assert_eq!(store.get("SCRAPER_TEST_DOES_NOT_EXIST"), None);
    }
}
