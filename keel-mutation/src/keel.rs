//! One-stop wiring of store, broadcaster, recovery and coordinator.

use std::sync::Arc;

use keel_cache::CacheStore;
use keel_core::{KeelConfig, KeelResult};
use keel_events::{BroadcastChannel, InvalidationBroadcaster, LocalBroadcastChannel};
use keel_recovery::{ErrorClassifier, InterventionNotifier, RecoveryBoundary, RecoveryExecutor, RecoveryService};
use tokio::task::JoinHandle;
use tracing::info;

use crate::coordinator::MutationCoordinator;

/// A fully wired cache holder.
///
/// Owns one [`CacheStore`] and the only [`MutationCoordinator`] that writes
/// into it. Consumers read and subscribe through [`Keel::store`]; failures
/// outside mutations go through [`Keel::recovery`].
pub struct Keel<T> {
    config: KeelConfig,
    store: Arc<CacheStore<T>>,
    channel: Arc<dyn BroadcastChannel>,
    broadcaster: Arc<InvalidationBroadcaster<T>>,
    recovery: RecoveryService,
    coordinator: Arc<MutationCoordinator<T>>,
}

impl<T> Keel<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Build a holder with its own in-process broadcast channel.
    pub fn new(
        config: KeelConfig,
        boundary: Arc<dyn RecoveryBoundary>,
        notifier: Arc<dyn InterventionNotifier>,
    ) -> KeelResult<Self> {
        config.validate()?;
        let channel: Arc<dyn BroadcastChannel> =
            Arc::new(LocalBroadcastChannel::new(config.coordinator.broadcast_capacity));
        Self::build(config, channel, boundary, notifier)
    }

    /// Build a holder on a channel shared with other holders.
    pub fn with_channel(
        config: KeelConfig,
        channel: Arc<dyn BroadcastChannel>,
        boundary: Arc<dyn RecoveryBoundary>,
        notifier: Arc<dyn InterventionNotifier>,
    ) -> KeelResult<Self> {
        config.validate()?;
        Self::build(config, channel, boundary, notifier)
    }

    fn build(
        config: KeelConfig,
        channel: Arc<dyn BroadcastChannel>,
        boundary: Arc<dyn RecoveryBoundary>,
        notifier: Arc<dyn InterventionNotifier>,
    ) -> KeelResult<Self> {
        let store = CacheStore::shared();
        let broadcaster = Arc::new(InvalidationBroadcaster::new(
            Arc::clone(&store),
            Arc::clone(&channel),
            config.coordinator.holder_id,
        ));
        let classifier = ErrorClassifier::new();
        let executor = Arc::new(RecoveryExecutor::new(config.recovery.clone(), boundary, notifier));
        let recovery = RecoveryService::new(classifier.clone(), Arc::clone(&executor));
        let coordinator = Arc::new(MutationCoordinator::new(
            Arc::clone(&broadcaster),
            classifier,
            executor,
            config.coordinator.clone(),
        ));

        info!(
            holder_id = %config.coordinator.holder_id,
            max_retry_attempts = config.recovery.max_retry_attempts,
            broadcast_capacity = config.coordinator.broadcast_capacity,
            "Keel holder ready"
        );

        Ok(Self {
            config,
            store,
            channel,
            broadcaster,
            recovery,
            coordinator,
        })
    }

    pub fn config(&self) -> &KeelConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<CacheStore<T>> {
        Arc::clone(&self.store)
    }

    pub fn channel(&self) -> Arc<dyn BroadcastChannel> {
        Arc::clone(&self.channel)
    }

    pub fn broadcaster(&self) -> Arc<InvalidationBroadcaster<T>> {
        Arc::clone(&self.broadcaster)
    }

    pub fn coordinator(&self) -> Arc<MutationCoordinator<T>> {
        Arc::clone(&self.coordinator)
    }

    pub fn recovery(&self) -> &RecoveryService {
        &self.recovery
    }

    /// Start applying invalidations announced by other holders.
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        self.broadcaster.spawn_listener()
    }

    /// Stop accepting mutations.
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }
}
