//! Background refetch with cancellation.
//!
//! A refetch pulls the authoritative value for one key from the remote
//! store and commits it. Two rules keep a slow read from clobbering a
//! fresher write:
//!
//! - starting a mutation on a key cancels its in-flight refetch
//! - a refetch result is discarded if the entry is dirty or its version
//!   advanced after the refetch started

use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{CacheError, RemoteError};
use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use crate::entry::CacheNotification;
use crate::key::CacheKey;
use crate::stats::CacheCounters;
use crate::store::{commit_into, CacheStore, SubscriptionId};
use crate::CacheResult;

/// Source of authoritative values for cache keys.
#[async_trait]
pub trait Fetcher<T>: Send + Sync {
    /// Fetch the current remote value, or `None` if it no longer exists.
    async fn fetch(&self, key: &CacheKey) -> Result<Option<T>, RemoteError>;
}

/// Bookkeeping for one in-flight refetch.
#[derive(Debug)]
pub(crate) struct InFlightRefetch {
    generation: u64,
    base_version: u64,
    abort: AbortHandle,
}

/// How a refetch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchOutcome {
    /// The fetched value was committed at this version.
    Applied { version: u64 },
    /// The remote reported the entity gone; the entry was removed.
    Removed,
    /// The entry changed locally while fetching; the result was dropped.
    Discarded,
    /// The refetch was cancelled or superseded before completing.
    Cancelled,
}

/// Handle to a spawned refetch.
#[derive(Debug)]
pub struct RefetchHandle {
    pub key: CacheKey,
    pub generation: u64,
    join: JoinHandle<CacheResult<RefetchOutcome>>,
}

impl RefetchHandle {
    /// Wait for the refetch to finish. Aborted refetches report `Cancelled`.
    pub async fn wait(self) -> CacheResult<RefetchOutcome> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(RefetchOutcome::Cancelled),
            Err(e) => Err(CacheError::RefetchFailed {
                key: self.key.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

impl<T> CacheStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawn a background refetch of `key`, superseding any earlier one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_refetch<F>(self: &Arc<Self>, key: CacheKey, fetcher: Arc<F>) -> CacheResult<RefetchHandle>
    where
        F: Fetcher<T> + ?Sized + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| CacheError::RefetchFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let base_version = self.version(&key)?;

        let mut refetches = self.lock_refetches()?;
        if let Some(previous) = refetches.remove(&key) {
            previous.abort.abort();
            CacheCounters::bump(&self.counters.refetches_cancelled);
        }

        let generation = self
            .next_generation
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        let store = Arc::clone(self);
        let task_key = key.clone();
        // The task cannot complete before its slot is registered: completion
        // takes the refetch lock, which is held until the insert below.
        let join = runtime.spawn(async move {
            let result = fetcher.fetch(&task_key).await;
            store.complete_refetch(&task_key, generation, result)
        });

        refetches.insert(
            key.clone(),
            InFlightRefetch {
                generation,
                base_version,
                abort: join.abort_handle(),
            },
        );
        debug!(key = %key, generation, "Spawned refetch");

        Ok(RefetchHandle {
            key,
            generation,
            join,
        })
    }

    /// Cancel the in-flight refetch of `key`, if any.
    pub fn cancel_refetch(&self, key: &CacheKey) -> CacheResult<bool> {
        let cancelled = self.lock_refetches()?.remove(key);
        match cancelled {
            Some(refetch) => {
                refetch.abort.abort();
                CacheCounters::bump(&self.counters.refetches_cancelled);
                debug!(key = %key, generation = refetch.generation, "Cancelled refetch");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn has_pending_refetch(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.lock_refetches()?.contains_key(key))
    }

    /// Refetch every invalidated key under `scope` with `fetcher`.
    ///
    /// The subscription holds only a weak reference to the store.
    pub fn attach_fetcher<F>(self: &Arc<Self>, scope: CacheKey, fetcher: Arc<F>) -> CacheResult<SubscriptionId>
    where
        F: Fetcher<T> + ?Sized + 'static,
    {
        let store = Arc::downgrade(self);
        self.subscribe(scope, move |notification| {
            let CacheNotification::Invalidated { key } = notification else {
                return;
            };
            let Some(store) = store.upgrade() else {
                return;
            };
            if let Err(e) = store.spawn_refetch(key.clone(), Arc::clone(&fetcher)) {
                warn!(key = %key, error = %e, "Could not start refetch");
            }
        })
    }

    fn complete_refetch(
        &self,
        key: &CacheKey,
        generation: u64,
        result: Result<Option<T>, RemoteError>,
    ) -> CacheResult<RefetchOutcome> {
        let (outcome, notification) = {
            let mut refetches = self.lock_refetches()?;
            let base_version = match refetches.get(key) {
                Some(slot) if slot.generation == generation => slot.base_version,
                _ => return Ok(RefetchOutcome::Cancelled),
            };
            refetches.remove(key);

            let mut entries = self.write_entries()?;
            if let Some(entry) = entries.get(key) {
                if entry.dirty || entry.version > base_version {
                    debug!(
                        key = %key,
                        dirty = entry.dirty,
                        version = entry.version,
                        base_version,
                        "Discarding refetch result for locally changed entry"
                    );
                    return Ok(RefetchOutcome::Discarded);
                }
            }

            match result {
                Ok(Some(value)) => {
                    let (version, notification) = commit_into(&mut entries, key.clone(), value);
                    CacheCounters::bump(&self.counters.commits);
                    (RefetchOutcome::Applied { version }, Some(notification))
                }
                Ok(None) => {
                    let removed = entries.remove(key).is_some();
                    let notification =
                        removed.then(|| CacheNotification::Removed { key: key.clone() });
                    (RefetchOutcome::Removed, notification)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Refetch failed");
                    return Err(CacheError::RefetchFailed {
                        key: key.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        };

        if let Some(notification) = notification {
            self.dispatch(&notification)?;
        }
        Ok(outcome)
    }
}
