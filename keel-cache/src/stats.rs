//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of reads that found an entry.
    pub hits: u64,
    /// Number of reads that found nothing.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Authoritative writes (each bumps an entry version).
    pub commits: u64,
    /// Optimistic writes awaiting confirmation.
    pub optimistic_writes: u64,
    /// Snapshots restored after a failed mutation.
    pub rollbacks: u64,
    /// Rollbacks skipped because a newer commit had landed.
    pub stale_rollbacks_skipped: u64,
    /// Entries marked stale by invalidation.
    pub invalidations: u64,
    /// Background refetches cancelled before completing.
    pub refetches_cancelled: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub commits: AtomicU64,
    pub optimistic_writes: AtomicU64,
    pub rollbacks: AtomicU64,
    pub stale_rollbacks_skipped: AtomicU64,
    pub invalidations: AtomicU64,
    pub refetches_cancelled: AtomicU64,
}

impl CacheCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entry_count: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            commits: self.commits.load(Ordering::Relaxed),
            optimistic_writes: self.optimistic_writes.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            stale_rollbacks_skipped: self.stale_rollbacks_skipped.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            refetches_cancelled: self.refetches_cancelled.load(Ordering::Relaxed),
        }
    }
}
