//! Cache entries, snapshots and change notifications.

use crate::key::CacheKey;
use chrono::Utc;
use keel_core::Timestamp;

/// One cached value with its commit history marker.
///
/// `version` counts authoritative commits and is never bumped by an
/// optimistic write. `dirty` is true while an optimistic value awaits
/// confirmation; `stale` is true after invalidation until the next commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub key: CacheKey,
    pub value: T,
    pub version: u64,
    pub last_updated: Timestamp,
    pub dirty: bool,
    pub stale: bool,
}

impl<T> CacheEntry<T> {
    pub(crate) fn committed(key: CacheKey, value: T, version: u64) -> Self {
        Self {
            key,
            value,
            version,
            last_updated: Utc::now(),
            dirty: false,
            stale: false,
        }
    }
}

/// The cache value captured immediately before an optimistic write.
///
/// `value` is `None` when the key had no entry; restoring such a snapshot
/// removes the optimistic entry again. Snapshots are never modified after
/// capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub key: CacheKey,
    pub value: Option<T>,
    pub version: u64,
    pub last_updated: Option<Timestamp>,
    pub stale: bool,
    pub taken_at: Timestamp,
}

/// Result of restoring a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackStatus {
    /// The snapshot value is back in place.
    Restored,
    /// A newer commit landed after the snapshot; nothing was changed.
    SkippedStale { snapshot_version: u64, current_version: u64 },
}

impl RollbackStatus {
    pub fn is_restored(&self) -> bool {
        matches!(self, RollbackStatus::Restored)
    }
}

/// Notification delivered synchronously to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheNotification<T> {
    /// A committed or optimistic value was written.
    Updated {
        key: CacheKey,
        value: T,
        version: u64,
        optimistic: bool,
    },
    /// An optimistic value was reverted to its snapshot.
    RolledBack { key: CacheKey, version: u64 },
    /// The entry should be refetched.
    Invalidated { key: CacheKey },
    /// The entry was dropped.
    Removed { key: CacheKey },
}

impl<T> CacheNotification<T> {
    pub fn key(&self) -> &CacheKey {
        match self {
            CacheNotification::Updated { key, .. }
            | CacheNotification::RolledBack { key, .. }
            | CacheNotification::Invalidated { key }
            | CacheNotification::Removed { key } => key,
        }
    }
}
