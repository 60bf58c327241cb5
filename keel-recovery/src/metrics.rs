//! Recovery metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for recovery activity since startup.
#[derive(Debug, Default)]
pub struct RecoveryMetrics {
    /// Recovery chains started
    pub recoveries_started: AtomicU64,

    /// Chains that ended recovered
    pub recovered: AtomicU64,

    /// Chains that ended failed
    pub failed: AtomicU64,

    /// Retry attempts of original operations
    pub retries: AtomicU64,

    /// Compensations or rollbacks the boundary reported as applied
    pub compensations_applied: AtomicU64,

    /// Escalations answered from the compensation ledger
    pub compensations_deduplicated: AtomicU64,

    /// Failures handed to a human
    pub manual_interventions: AtomicU64,

    /// Boundary calls that errored before producing a response
    pub boundary_errors: AtomicU64,
}

impl RecoveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RecoveryMetricsSnapshot {
        RecoveryMetricsSnapshot {
            recoveries_started: self.recoveries_started.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            compensations_applied: self.compensations_applied.load(Ordering::Relaxed),
            compensations_deduplicated: self.compensations_deduplicated.load(Ordering::Relaxed),
            manual_interventions: self.manual_interventions.load(Ordering::Relaxed),
            boundary_errors: self.boundary_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of recovery metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryMetricsSnapshot {
    pub recoveries_started: u64,
    pub recovered: u64,
    pub failed: u64,
    pub retries: u64,
    pub compensations_applied: u64,
    pub compensations_deduplicated: u64,
    pub manual_interventions: u64,
    pub boundary_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_snapshot() {
        let metrics = RecoveryMetrics::new();
        RecoveryMetrics::bump(&metrics.recoveries_started);
        RecoveryMetrics::bump(&metrics.recoveries_started);
        metrics.retries.store(3, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.recoveries_started, 2);
        assert_eq!(snapshot.retries, 3);
        assert_eq!(snapshot.failed, 0);
    }
}
