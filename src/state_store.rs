//! State Store (spec.md §4.5): durable, append-ordered metric history.
//!
//! Grounded on `signals/db_storage.rs`'s WAL-mode SQLite schema and
//! `parking_lot::Mutex`-guarded `Connection` convention; the composite
//! `"{dataSource}#{metricName}"` partition key plus RFC-3339 sort key
//! matches spec.md §6's row-shape requirement directly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::ScraperError;
use crate::models::{DataSource, MetricPoint, ValidationStatus};

/// Default TTL for aging out points (spec.md §4.5).
pub const DEFAULT_TTL: Duration = Duration::from_secs(730 * 24 * 3600);

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS metric_points (
    partition_key TEXT NOT NULL,
    sort_key TEXT NOT NULL,
    day TEXT NOT NULL,
    checksum TEXT NOT NULL,
    validation_status TEXT NOT NULL,
    payload TEXT NOT NULL,
    written_at TEXT NOT NULL,
    PRIMARY KEY (partition_key, sort_key)
);

CREATE INDEX IF NOT EXISTS idx_metric_points_partition_sort
    ON metric_points(partition_key, sort_key);

CREATE INDEX IF NOT EXISTS idx_metric_points_idempotency
    ON metric_points(partition_key, day, checksum);
"#;

pub trait StateStore: Send + Sync {
    fn put(&self, point: MetricPoint) -> Result<(), ScraperError>;
    fn get_latest(&self, key: &str) -> Result<Option<MetricPoint>, ScraperError>;
    fn get_range(
        &self,
        key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MetricPoint>, ScraperError>;
    /// Bypasses TTL to preserve a single fallback anchor.
    fn get_last_known_good(&self, key: &str) -> Result<Option<MetricPoint>, ScraperError>;
}

pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
    ttl: Duration,
}

impl SqliteStateStore {
    pub fn open(path: &str) -> Result<Self, ScraperError> {
        Self::open_with_ttl(path, DEFAULT_TTL)
    }

    pub fn open_with_ttl(path: &str, ttl: Duration) -> Result<Self, ScraperError> {
        let conn = Connection::open(path)
            .map_err(|e| ScraperError::cache_state_store("state_store", e.to_string()))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| ScraperError::cache_state_store("state_store", e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl,
        })
    }

    pub fn in_memory() -> Result<Self, ScraperError> {
        Self::open(":memory:")
    }

    fn row_to_point(payload: &str) -> Result<MetricPoint, ScraperError> {
        serde_json::from_str(payload)
            .map_err(|e| ScraperError::cache_state_store("state_store", e.to_string()))
    }

    /// Age out points past TTL. Exposed for callers that want an explicit
    /// purge cycle rather than filtering on every read.
    pub fn purge_expired(&self) -> Result<usize, ScraperError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.ttl.as_secs() as i64);
        let conn = self.conn.lock();
        let affected = conn
            .execute(
                "DELETE FROM metric_points WHERE written_at < ?1 AND partition_key NOT IN (
                    SELECT partition_key FROM metric_points m2
                    WHERE m2.validation_status = 'valid'
                    GROUP BY partition_key
                    HAVING MAX(sort_key) = metric_points.sort_key
                 )",
                params![cutoff.to_rfc3339()],
            )
            .map_err(|e| ScraperError::cache_state_store("state_store", e.to_string()))?;
        Ok(affected)
    }
}

impl StateStore for SqliteStateStore {
    fn put(&self, point: MetricPoint) -> Result<(), ScraperError> {
        let partition_key = point.key();
        let sort_key = point.timestamp.to_rfc3339();
        let day = point.timestamp.date_naive().to_string();
        let payload = serde_json::to_string(&point)
            .map_err(|e| ScraperError::cache_state_store("state_store", e.to_string()))?;
        let validation_status = match point.validation_status {
            ValidationStatus::Valid => "valid",
            ValidationStatus::Degraded => "degraded",
        };

        let conn = self.conn.lock();
        // Idempotent by checksum within a (key, day) window (spec.md §4.5).
        let existing: Option<String> = conn
            .query_row(
                "SELECT checksum FROM metric_points WHERE partition_key = ?1 AND day = ?2 AND checksum = ?3 LIMIT 1",
                params![partition_key, day, point.checksum],
                |row| row.get(0),
            )
            .ok();
        if existing.is_some() {
            return Ok(());
        }

        conn.execute(
            "INSERT OR REPLACE INTO metric_points (partition_key, sort_key, day, checksum, validation_status, payload, written_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                partition_key,
                sort_key,
                day,
                point.checksum,
                validation_status,
                payload,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| ScraperError::cache_state_store("state_store", e.to_string()))?;
        Ok(())
    }

    fn get_latest(&self, key: &str) -> Result<Option<MetricPoint>, ScraperError> {
        let conn = self.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM metric_points WHERE partition_key = ?1 ORDER BY sort_key DESC LIMIT 1",
                params![key],
                |row| row.get(0),
            )
            .ok();
        payload.map(|p| Self::row_to_point(&p)).transpose()
    }

    fn get_range(
        &self,
        key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MetricPoint>, ScraperError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT payload FROM metric_points WHERE partition_key = ?1 AND sort_key >= ?2 AND sort_key <= ?3 ORDER BY sort_key ASC",
            )
            .map_err(|e| ScraperError::cache_state_store("state_store", e.to_string()))?;
        let rows = stmt
            .query_map(params![key, from.to_rfc3339(), to.to_rfc3339()], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| ScraperError::cache_state_store("state_store", e.to_string()))?;
        let mut points = Vec::new();
        for row in rows {
            let payload = row.map_err(|e| ScraperError::cache_state_store("state_store", e.to_string()))?;
            points.push(Self::row_to_point(&payload)?);
        }
        Ok(points)
    }

    fn get_last_known_good(&self, key: &str) -> Result<Option<MetricPoint>, ScraperError> {
        let conn = self.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM metric_points WHERE partition_key = ?1 AND validation_status = 'valid' ORDER BY sort_key DESC LIMIT 1",
                params![key],
                |row| row.get(0),
            )
            .ok();
        payload.map(|p| Self::row_to_point(&p)).transpose()
    }
}

/// `"{dataSource}#{metricName}"` key helper, matching `MetricPoint::key`.
pub fn store_key(data_source: DataSource, metric_name: &str) -> String {
    format!("{}#{}", data_source.as_str(), metric_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricValue, Unit};
    use std::collections::{BTreeMap, BTreeSet};

    fn point(timestamp: DateTime<Utc>, checksum: &str, status: ValidationStatus) -> MetricPoint {
        MetricPoint::new(
            DataSource::BondIssuance,
            "weekly_total",
            MetricValue::Scalar(1.0),
            Unit::Currency,
            timestamp,
            0.9,
            checksum.to_string(),
            0.0,
            BTreeMap::new(),
            BTreeSet::new(),
            status,
        )
    }

    #[test]
    fn range_returns_points_in_nondecreasing_timestamp_order() {
        let store = SqliteStateStore::in_memory().unwrap();
        let t0 = Utc::now() - chrono::Duration::days(2);
        let t1 = Utc::now() - chrono::Duration::days(1);
        let t2 = Utc::now();
        store.put(point(t1, "b", ValidationStatus::Valid)).unwrap();
        store.put(point(t0, "a", ValidationStatus::Valid)).unwrap();
        store.put(point(t2, "c", ValidationStatus::Valid)).unwrap();

        let key = store_key(DataSource::BondIssuance, "weekly_total");
        let range = store
            .get_range(&key, t0 - chrono::Duration::seconds(1), t2 + chrono::Duration::seconds(1))
            .unwrap();
        let timestamps: Vec<_> = range.iter().map(|p| p.timestamp).collect();
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(timestamps, sorted);
        assert_eq!(range.len(), 3);
    }

    #[test]
    fn get_latest_returns_newest_point() {
        let store = SqliteStateStore::in_memory().unwrap();
        let key = store_key(DataSource::BondIssuance, "weekly_total");
        store
            .put(point(Utc::now() - chrono::Duration::hours(1), "old", ValidationStatus::Valid))
            .unwrap();
        store.put(point(Utc::now(), "new", ValidationStatus::Valid)).unwrap();
        let latest = store.get_latest(&key).unwrap().unwrap();
        assert_eq!(latest.checksum, "new");
    }

    #[test]
    fn last_known_good_skips_degraded_points() {
        let store = SqliteStateStore::in_memory().unwrap();
        let key = store_key(DataSource::BondIssuance, "weekly_total");
        store
            .put(point(Utc::now() - chrono::Duration::hours(2), "good", ValidationStatus::Valid))
            .unwrap();
        store
            .put(point(Utc::now(), "degraded", ValidationStatus::Degraded))
            .unwrap();
        let lkg = store.get_last_known_good(&key).unwrap().unwrap();
        assert_eq!(lkg.checksum, "good");
    }

    #[test]
    fn idempotent_put_within_same_day_and_checksum_is_a_no_op() {
        let store = SqliteStateStore::in_memory().unwrap();
        let key = store_key(DataSource::BondIssuance, "weekly_total");
        let ts = Utc::now();
        store.put(point(ts, "same", ValidationStatus::Valid)).unwrap();
        store
            .put(point(ts + chrono::Duration::seconds(5), "same", ValidationStatus::Valid))
            .unwrap();
        let range = store
            .get_range(&key, ts - chrono::Duration::minutes(1), ts + chrono::Duration::minutes(1))
            .unwrap();
        assert_eq!(range.len(), 1);
    }
}
