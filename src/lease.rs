//! Per-`(dataSource, metricName)` mutual-exclusion lease (spec.md §4.7, §4.9).
//!
//! Grounded on `scrapers/binance_session.rs::EndpointRotator`'s
//! `HashMap`-keyed-by-endpoint state tracking, generalized to a lease table
//! keyed by `(DataSource, String)`.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::DataSource;

#[derive(Default)]
pub struct LeaseTable {
    held: Mutex<HashSet<(DataSource, String)>>,
}

/// RAII guard: the lease is released when dropped, even on panic.
pub struct LeaseGuard {
    table: Arc<LeaseTable>,
    key: (DataSource, String),
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.table.held.lock().remove(&self.key);
    }
}

impl LeaseTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attempts to acquire the lease for `(source, metric)`. Returns `None`
    /// if a lease is already held, meaning the caller should return
    /// "skipped" without error (spec.md §4.7 step 1).
    pub fn try_acquire(self: &Arc<Self>, source: DataSource, metric: &str) -> Option<LeaseGuard> {
        let key = (source, metric.to_string());
        let mut held = self.held.lock();
        if held.contains(&key) {
            None
        } else {
            held.insert(key.clone());
            Some(LeaseGuard {
                table: Arc::clone(self),
                key,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_on_same_key_is_skipped() {
        let table = LeaseTable::new();
        let guard1 = table.try_acquire(DataSource::BdcDiscount, "avg_discount");
        assert!(guard1.is_some());
        let guard2 = table.try_acquire(DataSource::BdcDiscount, "avg_discount");
        assert!(guard2.is_none(), "overlapping acquire must be skipped");
    }

    #[test]
    fn releasing_the_guard_allows_reacquire() {
        let table = LeaseTable::new();
        {
            let _guard = table.try_acquire(DataSource::BondIssuance, "weekly_total").unwrap();
        }
        assert!(table
            .try_acquire(DataSource::BondIssuance, "weekly_total")
            .is_some());
    }

    #[test]
    fn different_metrics_do_not_contend() {
        let table = LeaseTable::new();
        let _g1 = table.try_acquire(DataSource::BdcDiscount, "avg_discount").unwrap();
        let g2 = table.try_acquire(DataSource::BdcDiscount, "nav_premium");
        assert!(g2.is_some());
    }
}
