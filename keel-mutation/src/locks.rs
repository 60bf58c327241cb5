//! Per-key mutation locks.
//!
//! Each cache key has one fair async mutex. Waiters are granted the lock in
//! the order they asked for it, which gives strict FIFO ordering of
//! mutations on the same key; different keys never block each other.
//! A key's slot is released when its last holder lets go with nobody
//! queued behind it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use keel_cache::CacheKey;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct KeySlot {
    lock: Arc<Mutex<()>>,
    /// Holders plus waiters.
    pending: AtomicUsize,
}

type Slots = DashMap<CacheKey, Arc<KeySlot>>;

/// Exclusive right to mutate one key. Released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    slots: Arc<Slots>,
    key: CacheKey,
    slot: Arc<KeySlot>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.slot.pending.fetch_sub(1, Ordering::AcqRel);
        // Only the map and this guard reference an idle slot; any acquirer
        // clones it under the same shard lock before waiting.
        self.slots.remove_if(&self.key, |_, slot| {
            slot.pending.load(Ordering::Acquire) == 0 && Arc::strong_count(slot) <= 2
        });
    }
}

#[derive(Debug, Default)]
pub struct KeyLocks {
    slots: Arc<Slots>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &CacheKey) -> KeyGuard {
        let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());
        slot.pending.fetch_add(1, Ordering::AcqRel);
        let pending = PendingCount(&slot);
        let guard = Arc::clone(&slot.lock).lock_owned().await;
        std::mem::forget(pending);
        KeyGuard {
            slots: Arc::clone(&self.slots),
            key: key.clone(),
            slot,
            _guard: guard,
        }
    }

    /// Mutations on `key` that hold or wait for its lock.
    pub fn pending(&self, key: &CacheKey) -> usize {
        self.slots
            .get(key)
            .map(|slot| slot.pending.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Drop slots no mutation is using, including ones left behind by
    /// waiters that gave up.
    pub fn prune(&self) {
        self.slots
            .retain(|_, slot| slot.pending.load(Ordering::Acquire) > 0 || Arc::strong_count(slot) > 1);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Undoes the pending increment if an `acquire` future is dropped while
/// waiting.
struct PendingCount<'a>(&'a KeySlot);

impl Drop for PendingCount<'_> {
    fn drop(&mut self) {
        self.0.pending.fetch_sub(1, Ordering::AcqRel);
    }
}
