//! Cache Store (spec.md §4.2): key -> bytes with per-entry TTL, backing the
//! fallback path of the Scraper Runner.
//!
//! Grounded on `signals/db_storage.rs`'s `rusqlite` + `parking_lot::Mutex`
//! connection-wrapping convention (WAL mode, a single guarded `Connection`
//! shared behind an `Arc`).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::ScraperError;
use crate::models::CacheEntry;

/// Hard bound for stale reads regardless of requested TTL (spec.md §4.2).
pub const HARD_STALE_BOUND: Duration = Duration::from_secs(7 * 24 * 3600);

pub enum CacheLookup {
    Hit(Vec<u8>),
    Miss,
}

pub trait CacheStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), ScraperError>;
    fn get(&self, key: &str) -> Result<CacheLookup, ScraperError>;
    /// Ignores TTL but still caps at `HARD_STALE_BOUND`.
    fn get_stale(&self, key: &str) -> Result<CacheLookup, ScraperError>;
}

/// Single-node backing: in-memory-fast SQLite file (or `:memory:` for tests),
/// matching `signals/db_storage.rs`'s schema-on-open convention.
pub struct SqliteCacheStore {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    written_at TEXT NOT NULL,
    ttl_secs INTEGER NOT NULL
) WITHOUT ROWID;
"#;

impl SqliteCacheStore {
    pub fn open(path: &str) -> Result<Self, ScraperError> {
        let conn = Connection::open(path)
            .map_err(|e| ScraperError::cache_state_store("cache", e.to_string()))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| ScraperError::cache_state_store("cache", e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, ScraperError> {
        Self::open(":memory:")
    }

    fn fetch_raw(&self, key: &str) -> Result<Option<(Vec<u8>, DateTime<Utc>, u64)>, ScraperError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT payload, written_at, ttl_secs FROM cache_entries WHERE key = ?1")
            .map_err(|e| ScraperError::cache_state_store("cache", e.to_string()))?;
        let row = stmt
            .query_row(params![key], |row| {
                let payload: Vec<u8> = row.get(0)?;
                let written_at: String = row.get(1)?;
                let ttl_secs: i64 = row.get(2)?;
                Ok((payload, written_at, ttl_secs as u64))
            })
            .ok();
        Ok(row.and_then(|(payload, written_at, ttl_secs)| {
            DateTime::parse_from_rfc3339(&written_at)
                .ok()
                .map(|dt| (payload, dt.with_timezone(&Utc), ttl_secs))
        }))
    }
}

impl CacheStore for SqliteCacheStore {
    fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), ScraperError> {
        // Last-writer-wins on writtenAt: a concurrent put for the same key
        // simply overwrites via INSERT OR REPLACE (spec.md §4.2).
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (key, payload, written_at, ttl_secs) VALUES (?1, ?2, ?3, ?4)",
            params![key, value, Utc::now().to_rfc3339(), ttl.as_secs() as i64],
        )
        .map_err(|e| ScraperError::cache_state_store("cache", e.to_string()))?;
        debug!(key, ttl_secs = ttl.as_secs(), "cache put");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<CacheLookup, ScraperError> {
        let Some((payload, written_at, ttl_secs)) = self.fetch_raw(key)? else {
            return Ok(CacheLookup::Miss);
        };
        let entry = CacheEntry {
            key: key.to_string(),
            payload,
            written_at,
            ttl: Duration::from_secs(ttl_secs),
        };
        if entry.is_fresh(Utc::now()) {
            Ok(CacheLookup::Hit(entry.payload))
        } else {
            Ok(CacheLookup::Miss)
        }
    }

    fn get_stale(&self, key: &str) -> Result<CacheLookup, ScraperError> {
        let Some((payload, written_at, _)) = self.fetch_raw(key)? else {
            return Ok(CacheLookup::Miss);
        };
        let age = Utc::now() - written_at;
        match age.to_std() {
            Ok(age) if age <= HARD_STALE_BOUND => Ok(CacheLookup::Hit(payload)),
            _ => Ok(CacheLookup::Miss),
        }
    }
}
