//! Invalidation broadcaster.
//!
//! Keeps several cache holders consistent with the remote store. After a
//! change settles, the broadcaster invalidates the related keys in the local
//! store and announces them on the channel; listeners on other holders
//! invalidate the same keys in theirs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::StreamExt;
use keel_cache::{CacheKey, CacheResult, CacheStore};
use keel_core::EntityId;
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{deliveries, BroadcastChannel, Delivery};
use crate::message::BroadcastMessage;

/// Local invalidation plus best-effort announcement to other holders.
pub struct InvalidationBroadcaster<T> {
    store: Arc<CacheStore<T>>,
    channel: Arc<dyn BroadcastChannel>,
    origin: EntityId,
    sent: AtomicU64,
    applied: AtomicU64,
}

impl<T> InvalidationBroadcaster<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<CacheStore<T>>, channel: Arc<dyn BroadcastChannel>, origin: EntityId) -> Self {
        Self {
            store,
            channel,
            origin,
            sent: AtomicU64::new(0),
            applied: AtomicU64::new(0),
        }
    }

    /// Identity of this holder on the channel.
    pub fn origin(&self) -> EntityId {
        self.origin
    }

    pub fn store(&self) -> &Arc<CacheStore<T>> {
        &self.store
    }

    /// Invalidate `related_keys` locally and announce `event`.
    ///
    /// The local invalidation happens before the send. The send itself is
    /// fire-and-forget; having nobody listening is not an error. Returns the
    /// number of local entries marked stale.
    pub fn on_settled(
        &self,
        related_keys: &[CacheKey],
        event: &str,
        payload: JsonValue,
    ) -> CacheResult<usize> {
        let marked = self.store.invalidate(related_keys)?;
        let receivers = self.channel.send(BroadcastMessage::new(
            event,
            payload,
            related_keys.to_vec(),
            self.origin,
        ));
        self.sent.fetch_add(1, Ordering::Relaxed);
        debug!(
            event = event,
            keys = related_keys.len(),
            marked,
            receivers,
            "Settled change broadcast"
        );
        Ok(marked)
    }

    /// Apply a message announced by another holder.
    ///
    /// Returns false for messages this holder sent itself.
    pub fn apply_remote(&self, message: &BroadcastMessage) -> CacheResult<bool> {
        if message.origin == self.origin {
            return Ok(false);
        }
        let marked = self.store.invalidate(&message.keys)?;
        self.applied.fetch_add(1, Ordering::Relaxed);
        debug!(
            event = %message.event,
            origin = %message.origin,
            keys = message.keys.len(),
            marked,
            "Applied remote invalidation"
        );
        Ok(true)
    }

    /// Listen on the channel and apply every remote message.
    ///
    /// A listener that lags behind has missed invalidations it cannot
    /// recover, so it invalidates the whole store. The task ends when the
    /// channel closes or the broadcaster is dropped.
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let rx = self.channel.subscribe();
        let broadcaster: Weak<Self> = Arc::downgrade(self);
        let origin = self.origin;

        tokio::spawn(async move {
            info!(origin = %origin, "Invalidation listener started");
            let mut stream = std::pin::pin!(deliveries(rx));
            while let Some(delivery) = stream.next().await {
                let Some(broadcaster) = broadcaster.upgrade() else {
                    break;
                };
                let result = match delivery {
                    Delivery::Message(message) => broadcaster.apply_remote(&message).map(|_| ()),
                    Delivery::Lagged(skipped) => {
                        warn!(
                            origin = %origin,
                            skipped,
                            "Listener lagged, invalidating entire cache"
                        );
                        broadcaster
                            .store
                            .invalidate(&[CacheKey::new(Vec::<String>::new())])
                            .map(|_| ())
                    }
                };
                if let Err(e) = result {
                    warn!(origin = %origin, error = %e, "Failed to apply remote invalidation");
                }
            }
            info!(origin = %origin, "Invalidation listener stopped");
        })
    }

    /// Messages sent by this holder.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Remote messages applied to the local store.
    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }
}
