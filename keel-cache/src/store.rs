//! Versioned cache store.
//!
//! The store is the single shared mutable resource of a cache holder. It is
//! constructed once and passed around as `Arc<CacheStore<T>>`; there is no
//! global instance. Subscribers are notified synchronously after the write
//! that triggered them, with no internal lock held, so callbacks may read
//! from or write to the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use keel_core::CacheError;
use tracing::{debug, trace};

use crate::entry::{CacheEntry, CacheNotification, RollbackStatus, Snapshot};
use crate::key::CacheKey;
use crate::refetch::InFlightRefetch;
use crate::stats::{CacheCounters, CacheStats};
use crate::CacheResult;

/// Handle returned by [`CacheStore::subscribe`].
pub type SubscriptionId = u64;

type Callback<T> = Arc<dyn Fn(&CacheNotification<T>) + Send + Sync>;

struct Subscriber<T> {
    id: SubscriptionId,
    key: CacheKey,
    callback: Callback<T>,
}

/// Keyed store of versioned entity values.
pub struct CacheStore<T> {
    entries: RwLock<HashMap<CacheKey, CacheEntry<T>>>,
    subscribers: RwLock<Vec<Subscriber<T>>>,
    next_subscription: AtomicU64,
    pub(crate) refetches: Mutex<HashMap<CacheKey, InFlightRefetch>>,
    pub(crate) next_generation: AtomicU64,
    pub(crate) counters: CacheCounters,
}

impl<T> Default for CacheStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CacheStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            refetches: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            counters: CacheCounters::default(),
        }
    }

    /// Convenience constructor for the usual shared form.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Get the full entry for a key.
    pub fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry<T>>> {
        let entry = self.read_entries()?.get(key).cloned();
        if entry.is_some() {
            CacheCounters::bump(&self.counters.hits);
        } else {
            CacheCounters::bump(&self.counters.misses);
        }
        Ok(entry)
    }

    /// Get only the current value for a key.
    pub fn get_current(&self, key: &CacheKey) -> CacheResult<Option<T>> {
        Ok(self.get(key)?.map(|entry| entry.value))
    }

    /// Committed version of a key, 0 when absent. Does not touch statistics.
    pub fn version(&self, key: &CacheKey) -> CacheResult<u64> {
        Ok(self.read_entries()?.get(key).map(|e| e.version).unwrap_or(0))
    }

    pub fn keys(&self) -> CacheResult<Vec<CacheKey>> {
        let mut keys: Vec<CacheKey> = self.read_entries()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    pub fn stats(&self) -> CacheResult<CacheStats> {
        let entry_count = self.read_entries()?.len() as u64;
        Ok(self.counters.snapshot(entry_count))
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Commit an authoritative value and return its new version.
    pub fn set(&self, key: CacheKey, value: T) -> CacheResult<u64> {
        let (version, notification) = {
            let mut entries = self.write_entries()?;
            commit_into(&mut entries, key, value)
        };
        CacheCounters::bump(&self.counters.commits);
        trace!(key = %notification.key(), version, "Committed cache entry");
        self.notify(&notification)?;
        Ok(version)
    }

    /// Write a projected value ahead of server confirmation.
    ///
    /// The entry is marked dirty and keeps its committed version, so a later
    /// rollback restores it exactly. Absent keys get a version-0 entry.
    pub fn apply_optimistic(&self, key: CacheKey, value: T) -> CacheResult<()> {
        let notification = {
            let mut entries = self.write_entries()?;
            let (version, stale) = entries
                .get(&key)
                .map(|e| (e.version, e.stale))
                .unwrap_or((0, false));
            entries.insert(
                key.clone(),
                CacheEntry {
                    key: key.clone(),
                    value: value.clone(),
                    version,
                    last_updated: Utc::now(),
                    dirty: true,
                    stale,
                },
            );
            CacheNotification::Updated {
                key,
                value,
                version,
                optimistic: true,
            }
        };
        CacheCounters::bump(&self.counters.optimistic_writes);
        self.notify(&notification)
    }

    /// Capture the current state of a key before an optimistic write.
    pub fn snapshot(&self, key: &CacheKey) -> CacheResult<Snapshot<T>> {
        let entries = self.read_entries()?;
        let snapshot = match entries.get(key) {
            Some(entry) => Snapshot {
                key: key.clone(),
                value: Some(entry.value.clone()),
                version: entry.version,
                last_updated: Some(entry.last_updated),
                stale: entry.stale,
                taken_at: Utc::now(),
            },
            None => Snapshot {
                key: key.clone(),
                value: None,
                version: 0,
                last_updated: None,
                stale: false,
                taken_at: Utc::now(),
            },
        };
        Ok(snapshot)
    }

    /// Restore a snapshot unless a newer commit has landed since it was taken.
    pub fn rollback(&self, snapshot: Snapshot<T>) -> CacheResult<RollbackStatus> {
        let notification = {
            let mut entries = self.write_entries()?;
            let current = entries.get(&snapshot.key);
            let current_version = current.map(|e| e.version).unwrap_or(0);

            if current_version > snapshot.version {
                CacheCounters::bump(&self.counters.stale_rollbacks_skipped);
                debug!(
                    key = %snapshot.key,
                    snapshot_version = snapshot.version,
                    current_version,
                    "Skipping stale rollback"
                );
                return Ok(RollbackStatus::SkippedStale {
                    snapshot_version: snapshot.version,
                    current_version,
                });
            }

            let invalidated_since = current.map(|e| e.stale).unwrap_or(false);
            let key = snapshot.key;
            match snapshot.value {
                Some(value) => {
                    entries.insert(
                        key.clone(),
                        CacheEntry {
                            key: key.clone(),
                            value,
                            version: snapshot.version,
                            last_updated: snapshot.last_updated.unwrap_or_else(Utc::now),
                            dirty: false,
                            stale: snapshot.stale || invalidated_since,
                        },
                    );
                }
                None => {
                    entries.remove(&key);
                }
            }
            CacheNotification::RolledBack {
                key,
                version: snapshot.version,
            }
        };
        CacheCounters::bump(&self.counters.rollbacks);
        debug!(key = %notification.key(), "Rolled back optimistic entry");
        self.notify(&notification)?;
        Ok(RollbackStatus::Restored)
    }

    /// Mark every entry under each key stale and notify subscribers.
    ///
    /// Keys are prefixes: invalidating `["stock"]` covers every
    /// `["stock", ..]` entry. A key with no matching entries still notifies
    /// its subscribers so they can fetch it. Returns the number of entries
    /// marked.
    pub fn invalidate(&self, keys: &[CacheKey]) -> CacheResult<usize> {
        let mut notifications = Vec::new();
        let marked = {
            let mut entries = self.write_entries()?;
            let mut marked = 0;
            for key in keys {
                let mut matched = false;
                for (entry_key, entry) in entries.iter_mut() {
                    if key.is_prefix_of(entry_key) {
                        matched = true;
                        if !entry.stale {
                            entry.stale = true;
                            marked += 1;
                        }
                        notifications.push(CacheNotification::Invalidated {
                            key: entry_key.clone(),
                        });
                    }
                }
                if !matched {
                    notifications.push(CacheNotification::Invalidated { key: key.clone() });
                }
            }
            marked
        };
        notifications.sort_by(|a, b| a.key().cmp(b.key()));
        notifications.dedup_by(|a, b| a.key() == b.key());

        CacheCounters::add(&self.counters.invalidations, marked as u64);
        debug!(requested = keys.len(), marked, "Invalidated cache keys");
        for notification in &notifications {
            self.notify(notification)?;
        }
        Ok(marked)
    }

    /// Drop an entry entirely.
    pub fn remove(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry<T>>> {
        let removed = self.write_entries()?.remove(key);
        if removed.is_some() {
            self.notify(&CacheNotification::Removed { key: key.clone() })?;
        }
        Ok(removed)
    }

    // ========================================================================
    // SUBSCRIPTIONS
    // ========================================================================

    /// Register a callback for changes to `key` and every key below it.
    pub fn subscribe<F>(&self, key: CacheKey, callback: F) -> CacheResult<SubscriptionId>
    where
        F: Fn(&CacheNotification<T>) + Send + Sync + 'static,
    {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .map_err(|_| CacheError::LockPoisoned)?
            .push(Subscriber {
                id,
                key,
                callback: Arc::new(callback),
            });
        Ok(id)
    }

    /// Remove a subscription. Returns false when the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> CacheResult<bool> {
        let mut subscribers = self.subscribers.write().map_err(|_| CacheError::LockPoisoned)?;
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        Ok(subscribers.len() != before)
    }

    fn notify(&self, notification: &CacheNotification<T>) -> CacheResult<()> {
        let callbacks: Vec<Callback<T>> = {
            let subscribers = self.subscribers.read().map_err(|_| CacheError::LockPoisoned)?;
            let key = notification.key();
            let reaches_descendants = matches!(notification, CacheNotification::Invalidated { .. });
            subscribers
                .iter()
                .filter(|s| {
                    s.key.is_prefix_of(key) || (reaches_descendants && key.is_prefix_of(&s.key))
                })
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };
        for callback in callbacks {
            callback(notification);
        }
        Ok(())
    }

    // ========================================================================
    // LOCK HELPERS
    // ========================================================================

    fn read_entries(&self) -> CacheResult<RwLockReadGuard<'_, HashMap<CacheKey, CacheEntry<T>>>> {
        self.entries.read().map_err(|_| CacheError::LockPoisoned)
    }

    pub(crate) fn write_entries(
        &self,
    ) -> CacheResult<RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry<T>>>> {
        self.entries.write().map_err(|_| CacheError::LockPoisoned)
    }

    pub(crate) fn lock_refetches(
        &self,
    ) -> CacheResult<MutexGuard<'_, HashMap<CacheKey, InFlightRefetch>>> {
        self.refetches.lock().map_err(|_| CacheError::LockPoisoned)
    }

    pub(crate) fn dispatch(&self, notification: &CacheNotification<T>) -> CacheResult<()> {
        self.notify(notification)
    }
}

/// Write a committed value into a locked entry map, bumping its version.
pub(crate) fn commit_into<T: Clone>(
    entries: &mut HashMap<CacheKey, CacheEntry<T>>,
    key: CacheKey,
    value: T,
) -> (u64, CacheNotification<T>) {
    let version = entries.get(&key).map(|e| e.version + 1).unwrap_or(1);
    entries.insert(
        key.clone(),
        CacheEntry::committed(key.clone(), value.clone(), version),
    );
    (
        version,
        CacheNotification::Updated {
            key,
            value,
            version,
            optimistic: false,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn key(s: &str) -> CacheKey {
        CacheKey::from(s)
    }

    #[test]
    fn test_set_bumps_version_and_clears_flags() {
        let store = CacheStore::<i32>::new();
        assert_eq!(store.set(key("cart:u1"), 1).unwrap(), 1);
        store.apply_optimistic(key("cart:u1"), 2).unwrap();
        store.invalidate(&[key("cart:u1")]).unwrap();
        assert_eq!(store.set(key("cart:u1"), 3).unwrap(), 2);

        let entry = store.get(&key("cart:u1")).unwrap().unwrap();
        assert_eq!(entry.value, 3);
        assert_eq!(entry.version, 2);
        assert!(!entry.dirty);
        assert!(!entry.stale);
    }

    #[test]
    fn test_optimistic_write_keeps_version() {
        let store = CacheStore::<i32>::new();
        store.set(key("cart:u1"), 1).unwrap();
        store.apply_optimistic(key("cart:u1"), 5).unwrap();

        let entry = store.get(&key("cart:u1")).unwrap().unwrap();
        assert_eq!(entry.value, 5);
        assert_eq!(entry.version, 1);
        assert!(entry.dirty);
    }

    #[test]
    fn test_rollback_restores_snapshot_exactly() {
        let store = CacheStore::<i32>::new();
        store.set(key("cart:u1"), 1).unwrap();
        let before = store.get(&key("cart:u1")).unwrap().unwrap();

        let snapshot = store.snapshot(&key("cart:u1")).unwrap();
        store.apply_optimistic(key("cart:u1"), 99).unwrap();
        let status = store.rollback(snapshot).unwrap();

        assert_eq!(status, RollbackStatus::Restored);
        assert_eq!(store.get(&key("cart:u1")).unwrap().unwrap(), before);
    }

    #[test]
    fn test_rollback_of_absent_key_removes_entry() {
        let store = CacheStore::<i32>::new();
        let snapshot = store.snapshot(&key("cart:u2")).unwrap();
        assert_eq!(snapshot.value, None);

        store.apply_optimistic(key("cart:u2"), 4).unwrap();
        assert!(store.get(&key("cart:u2")).unwrap().is_some());

        store.rollback(snapshot).unwrap();
        assert!(store.get(&key("cart:u2")).unwrap().is_none());
    }

    #[test]
    fn test_stale_rollback_is_noop() {
        let store = CacheStore::<i32>::new();
        store.set(key("stock:p1"), 10).unwrap();
        let snapshot = store.snapshot(&key("stock:p1")).unwrap();
        store.apply_optimistic(key("stock:p1"), 9).unwrap();

        // A concurrent authoritative write lands first.
        store.set(key("stock:p1"), 7).unwrap();

        let status = store.rollback(snapshot).unwrap();
        assert_eq!(
            status,
            RollbackStatus::SkippedStale {
                snapshot_version: 1,
                current_version: 2
            }
        );
        let entry = store.get(&key("stock:p1")).unwrap().unwrap();
        assert_eq!(entry.value, 7);
        assert_eq!(entry.version, 2);
        assert_eq!(store.stats().unwrap().stale_rollbacks_skipped, 1);
    }

    #[test]
    fn test_invalidate_prefix_marks_descendants() {
        let store = CacheStore::<i32>::new();
        store.set(key("stock:p1"), 1).unwrap();
        store.set(key("stock:p2"), 2).unwrap();
        store.set(key("cart:u1"), 3).unwrap();

        let marked = store.invalidate(&[CacheKey::root("stock")]).unwrap();
        assert_eq!(marked, 2);
        assert!(store.get(&key("stock:p1")).unwrap().unwrap().stale);
        assert!(store.get(&key("stock:p2")).unwrap().unwrap().stale);
        assert!(!store.get(&key("cart:u1")).unwrap().unwrap().stale);

        // Already stale entries are not counted twice.
        assert_eq!(store.invalidate(&[key("stock:p1")]).unwrap(), 0);
    }

    #[test]
    fn test_subscribers_notified_synchronously() {
        let store = CacheStore::<i32>::new();
        let seen: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store
            .subscribe(CacheKey::root("cart"), move |n| {
                let label = match n {
                    CacheNotification::Updated { optimistic: true, .. } => "optimistic",
                    CacheNotification::Updated { .. } => "commit",
                    CacheNotification::RolledBack { .. } => "rollback",
                    CacheNotification::Invalidated { .. } => "invalidate",
                    CacheNotification::Removed { .. } => "remove",
                };
                sink.lock().unwrap().push(format!("{}@{}", label, n.key()));
            })
            .unwrap();

        store.set(key("cart:u1"), 1).unwrap();
        let snapshot = store.snapshot(&key("cart:u1")).unwrap();
        store.apply_optimistic(key("cart:u1"), 2).unwrap();
        store.rollback(snapshot).unwrap();
        store.invalidate(&[key("cart:u1")]).unwrap();
        store.set(key("stock:p1"), 1).unwrap();
        store.remove(&key("cart:u1")).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "commit@cart:u1",
                "optimistic@cart:u1",
                "rollback@cart:u1",
                "invalidate@cart:u1",
                "remove@cart:u1",
            ]
        );
    }

    #[test]
    fn test_invalidating_parent_reaches_subscriber_without_entry() {
        let store = CacheStore::<i32>::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&hits);
        store
            .subscribe(key("orders:u1"), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        store.invalidate(&[CacheKey::root("orders")]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_reenter_store() {
        let store = Arc::new(CacheStore::<i32>::new());
        let inner = Arc::clone(&store);
        let observed = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&observed);
        store
            .subscribe(key("cart:u1"), move |n| {
                if let Some(v) = inner.get_current(n.key()).unwrap() {
                    sink.store(v as u64, Ordering::SeqCst);
                }
            })
            .unwrap();

        store.set(key("cart:u1"), 41).unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 41);
    }

    #[test]
    fn test_unsubscribe() {
        let store = CacheStore::<i32>::new();
        let id = store.subscribe(key("cart"), |_| {}).unwrap();
        assert!(store.unsubscribe(id).unwrap());
        assert!(!store.unsubscribe(id).unwrap());
    }

    #[test]
    fn test_stats_track_reads_and_writes() {
        let store = CacheStore::<i32>::new();
        store.set(key("a"), 1).unwrap();
        store.get(&key("a")).unwrap();
        store.get(&key("b")).unwrap();
        store.apply_optimistic(key("a"), 2).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.optimistic_writes, 1);
        assert_eq!(stats.entry_count, 1);
    }
}
