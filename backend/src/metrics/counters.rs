use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub or_issued: Arc<AtomicU64>,
    pub or_cancelled: Arc<AtomicU64>,
    pub or_voided: Arc<AtomicU64>,
    pub or_reverted: Arc<AtomicU64>,

    pub payments_created: Arc<AtomicU64>,
    pub payments_cancelled: Arc<AtomicU64>,

    // allocation outcomes
    pub lines_skipped: Arc<AtomicU64>,
    pub discounts_clamped: Arc<AtomicU64>,

    // saga
    pub compensations: Arc<AtomicU64>,
    /// Compensations that themselves failed; need manual reconciliation.
    pub reconciliation_needed: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub or_issued: u64,
    pub or_cancelled: u64,
    pub or_voided: u64,
    pub or_reverted: u64,
    pub payments_created: u64,
    pub payments_cancelled: u64,
    pub lines_skipped: u64,
    pub discounts_clamped: u64,
    pub compensations: u64,
    pub reconciliation_needed: u64,
}

impl Counters {
    pub fn inc(&self, c: &AtomicU64) {
        c.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, c: &AtomicU64, n: u64) {
        c.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CountersSnapshot {
            or_issued: get(&self.or_issued),
            or_cancelled: get(&self.or_cancelled),
            or_voided: get(&self.or_voided),
            or_reverted: get(&self.or_reverted),
            payments_created: get(&self.payments_created),
            payments_cancelled: get(&self.payments_cancelled),
            lines_skipped: get(&self.lines_skipped),
            discounts_clamped: get(&self.discounts_clamped),
            compensations: get(&self.compensations),
            reconciliation_needed: get(&self.reconciliation_needed),
        }
    }
}
