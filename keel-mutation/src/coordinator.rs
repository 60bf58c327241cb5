//! Optimistic mutation coordinator.
//!
//! Drives one mutation per key at a time through
//! `Snapshotting -> OptimisticallyApplied -> (Committing | RollingBack)`.
//! The caller sees the local outcome as soon as the cache has settled; on
//! failure the recovery chain keeps running in the background and reports
//! through [`PendingRecovery`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use keel_cache::{CacheKey, CacheStore, RollbackStatus, Snapshot};
use keel_core::constants::{EVENT_MUTATION_COMMITTED, EVENT_MUTATION_RECOVERED};
use keel_core::{
    CacheError, CoordinatorConfig, ErrorContext, Metadata, MutationError, RecoveryResult, RemoteError,
};
use keel_events::InvalidationBroadcaster;
use keel_recovery::{ErrorClassifier, RecoveryExecutor, RetryOperation};
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::locks::KeyLocks;
use crate::operation::RemoteOperation;
use crate::outcome::{MutationOutcome, PendingRecovery};
use crate::phase::{MutationPhase, PhaseTracker};

// ============================================================================
// MUTATION REQUEST
// ============================================================================

/// What is being mutated, and what to tell recovery if it fails.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub key: CacheKey,
    /// Operation name used for classification hints and recovery requests.
    pub operation: String,
    /// Keys invalidated once the mutation settles.
    pub related_keys: Vec<CacheKey>,
    pub related_entity_id: Option<String>,
    pub related_user_id: Option<String>,
    pub metadata: Metadata,
}

impl MutationRequest {
    pub fn new(key: CacheKey, operation: impl Into<String>) -> Self {
        Self {
            key,
            operation: operation.into(),
            related_keys: Vec::new(),
            related_entity_id: None,
            related_user_id: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_related_key(mut self, key: CacheKey) -> Self {
        self.related_keys.push(key);
        self
    }

    pub fn with_related_keys(mut self, keys: impl IntoIterator<Item = CacheKey>) -> Self {
        self.related_keys.extend(keys);
        self
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.related_entity_id = Some(entity_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.related_user_id = Some(user_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Failure context for a remote error of this request.
    fn error_context(&self, classifier: &ErrorClassifier, error: &RemoteError) -> ErrorContext {
        let kind = classifier.classify(error, Some(self.operation.as_str()));
        let mut context = ErrorContext::new(kind, self.operation.clone(), error.message.clone())
            .with_metadata_map(self.metadata.clone())
            .with_metadata("cache_key", json!(self.key.to_string()));
        context.related_entity_id = self.related_entity_id.clone();
        context.related_user_id = self.related_user_id.clone();
        if let Some(code) = &error.code {
            context = context.with_metadata("error_code", json!(code));
        }
        context
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Sole writer of mutations into one [`CacheStore`].
pub struct MutationCoordinator<T> {
    store: Arc<CacheStore<T>>,
    broadcaster: Arc<InvalidationBroadcaster<T>>,
    classifier: ErrorClassifier,
    executor: Arc<RecoveryExecutor>,
    locks: Arc<KeyLocks>,
    phases: Arc<PhaseTracker>,
    config: CoordinatorConfig,
    shutting_down: AtomicBool,
    recoveries_in_flight: Arc<AtomicUsize>,
}

impl<T> MutationCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Mutations write into the broadcaster's store.
    pub fn new(
        broadcaster: Arc<InvalidationBroadcaster<T>>,
        classifier: ErrorClassifier,
        executor: Arc<RecoveryExecutor>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store: Arc::clone(broadcaster.store()),
            broadcaster,
            classifier,
            executor,
            locks: Arc::new(KeyLocks::new()),
            phases: Arc::new(PhaseTracker::new()),
            config,
            shutting_down: AtomicBool::new(false),
            recoveries_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore<T>> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<InvalidationBroadcaster<T>> {
        &self.broadcaster
    }

    pub fn executor(&self) -> &Arc<RecoveryExecutor> {
        &self.executor
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Current phase of the active mutation on `key`.
    pub fn phase(&self, key: &CacheKey) -> MutationPhase {
        self.phases.phase(key)
    }

    /// Mutations on `key` that are running or queued behind the running one.
    pub fn pending_mutations(&self, key: &CacheKey) -> usize {
        self.locks.pending(key)
    }

    /// Background recoveries that have not reported yet.
    pub fn recoveries_in_flight(&self) -> usize {
        self.recoveries_in_flight.load(Ordering::Acquire)
    }

    /// Refuse new mutations. Running mutations and recoveries finish.
    pub fn shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            info!(
                recoveries_in_flight = self.recoveries_in_flight(),
                "Mutation coordinator shutting down"
            );
        }
        self.locks.prune();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Apply `projector` to the cached value of `request.key` right away,
    /// then confirm it with `remote`.
    ///
    /// Mutations on the same key run strictly in arrival order. On success
    /// the remote value is committed and the related keys are invalidated
    /// and broadcast. On failure the snapshot is restored before this
    /// returns, and recovery continues in the background. Errors are only
    /// returned when the cache itself fails or the coordinator is shutting
    /// down.
    ///
    /// Dropping the returned future before it completes restores the
    /// snapshot as well; no recovery runs for an abandoned mutation.
    pub async fn mutate<P, R>(
        &self,
        request: MutationRequest,
        projector: P,
        remote: R,
    ) -> Result<MutationOutcome<T>, MutationError>
    where
        P: FnOnce(Option<&T>) -> T,
        R: RemoteOperation<T> + 'static,
    {
        if self.is_shutting_down() {
            return Err(MutationError::ShuttingDown);
        }

        let key = request.key.clone();
        let lock = self.locks.acquire(&key).await;
        let phase = self.phases.track(key.clone());

        phase.enter(MutationPhase::Snapshotting);
        self.store
            .cancel_refetch(&key)
            .map_err(|e| cache_failure(&key, MutationPhase::Snapshotting, e))?;
        let snapshot = self
            .store
            .snapshot(&key)
            .map_err(|e| cache_failure(&key, MutationPhase::Snapshotting, e))?;

        phase.enter(MutationPhase::OptimisticallyApplied);
        let projected = projector(snapshot.value.as_ref());
        let snapshot_version = snapshot.version;
        self.store
            .apply_optimistic(key.clone(), projected)
            .map_err(|e| cache_failure(&key, MutationPhase::OptimisticallyApplied, e))?;
        let pending = OptimisticWrite::new(&self.store, snapshot);
        debug!(
            key = %key,
            operation = %request.operation,
            snapshot_version,
            "Optimistic value applied"
        );

        let remote = Arc::new(remote);
        match remote.call().await {
            Ok(value) => {
                phase.enter(MutationPhase::Committing);
                let version = self
                    .store
                    .set(key.clone(), value.clone())
                    .map_err(|e| cache_failure(&key, MutationPhase::Committing, e))?;
                pending.settle();

                let keys = self.settle_keys(&request);
                let payload = json!({
                    "key": key.to_string(),
                    "operation": request.operation,
                    "version": version,
                });
                if let Err(e) = self
                    .broadcaster
                    .on_settled(&keys, EVENT_MUTATION_COMMITTED, payload)
                {
                    warn!(key = %key, error = %e, "Failed to invalidate related keys after commit");
                }
                info!(key = %key, operation = %request.operation, version, "Mutation committed");
                Ok(MutationOutcome::Committed { value, version })
            }
            Err(error) => {
                phase.enter(MutationPhase::RollingBack);
                let rollback = match pending.settle() {
                    Some(snapshot) => self
                        .store
                        .rollback(snapshot)
                        .map_err(|e| cache_failure(&key, MutationPhase::RollingBack, e))?,
                    None => RollbackStatus::Restored,
                };

                let context = request.error_context(&self.classifier, &error);
                warn!(
                    key = %key,
                    operation = %request.operation,
                    error_kind = %context.error_kind,
                    restored = rollback.is_restored(),
                    error = %error,
                    "Mutation rolled back"
                );

                drop(phase);
                drop(lock);

                let error_kind = context.error_kind;
                let recovery = self.spawn_recovery(&request, context, remote);
                Ok(MutationOutcome::RolledBack {
                    error_kind,
                    rollback,
                    error,
                    recovery,
                })
            }
        }
    }

    fn settle_keys(&self, request: &MutationRequest) -> Vec<CacheKey> {
        let mut keys = request.related_keys.clone();
        if self.config.invalidate_mutated_key && !keys.contains(&request.key) {
            keys.push(request.key.clone());
        }
        keys
    }

    /// Run the recovery chain for a rolled-back mutation on its own task.
    fn spawn_recovery<R>(
        &self,
        request: &MutationRequest,
        context: ErrorContext,
        remote: Arc<R>,
    ) -> PendingRecovery
    where
        R: RemoteOperation<T> + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let retry = RetryCommit {
            key: request.key.clone(),
            remote,
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
        };
        let keys = self.settle_keys(request);
        let executor = Arc::clone(&self.executor);
        let broadcaster = Arc::clone(&self.broadcaster);
        let in_flight = Arc::clone(&self.recoveries_in_flight);
        in_flight.fetch_add(1, Ordering::AcqRel);

        tokio::spawn(async move {
            let key = retry.key.clone();
            let operation = context.operation.clone();
            let result = executor.execute(context, Some(&retry)).await;

            if result.changed_state() {
                let payload = json!({
                    "key": key.to_string(),
                    "operation": operation,
                    "action": result.action,
                });
                if let Err(e) = broadcaster.on_settled(&keys, EVENT_MUTATION_RECOVERED, payload) {
                    warn!(key = %key, error = %e, "Failed to invalidate related keys after recovery");
                }
            }
            log_recovery(&key, &operation, &result);

            in_flight.fetch_sub(1, Ordering::AcqRel);
            if tx.send(result).is_err() {
                debug!(key = %key, "Recovery result dropped by caller");
            }
        });

        PendingRecovery::new(rx)
    }
}

/// An optimistic write not yet settled by commit or rollback.
///
/// Dropped unsettled, for instance when the caller abandons `mutate` while
/// the remote call is pending, it restores its snapshot.
struct OptimisticWrite<'a, T>
where
    T: Clone + Send + Sync + 'static,
{
    store: &'a CacheStore<T>,
    snapshot: Option<Snapshot<T>>,
}

impl<'a, T> OptimisticWrite<'a, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new(store: &'a CacheStore<T>, snapshot: Snapshot<T>) -> Self {
        Self {
            store,
            snapshot: Some(snapshot),
        }
    }

    /// Take the snapshot back; the caller now owns the outcome.
    fn settle(mut self) -> Option<Snapshot<T>> {
        self.snapshot.take()
    }
}

impl<T> Drop for OptimisticWrite<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let Some(snapshot) = self.snapshot.take() else {
            return;
        };
        let key = snapshot.key.clone();
        match self.store.rollback(snapshot) {
            Ok(status) => warn!(
                key = %key,
                restored = status.is_restored(),
                "Mutation abandoned before settling, optimistic value rolled back"
            ),
            Err(e) => error!(key = %key, error = %e, "Failed to roll back abandoned mutation"),
        }
    }
}

fn cache_failure(key: &CacheKey, phase: MutationPhase, source: CacheError) -> MutationError {
    MutationError::Cache {
        key: key.to_string(),
        phase: phase.to_string(),
        source,
    }
}

fn log_recovery(key: &CacheKey, operation: &str, result: &RecoveryResult) {
    if result.success {
        info!(
            key = %key,
            operation = operation,
            action = %result.action,
            attempts = result.attempts,
            compensation_applied = result.compensation_applied,
            "Mutation recovery finished"
        );
    } else {
        warn!(
            key = %key,
            operation = operation,
            action = %result.action,
            attempts = result.attempts,
            error = ?result.error,
            "Mutation recovery failed"
        );
    }
}

/// Retry of a failed mutation, committed under the key's lock so it queues
/// behind any mutation that started after the failure.
struct RetryCommit<T, R> {
    key: CacheKey,
    remote: Arc<R>,
    store: Arc<CacheStore<T>>,
    locks: Arc<KeyLocks>,
}

#[async_trait]
impl<T, R> RetryOperation for RetryCommit<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: RemoteOperation<T> + 'static,
{
    async fn attempt(&self, attempt: u32) -> Result<(), RemoteError> {
        let _lock = self.locks.acquire(&self.key).await;
        if let Err(e) = self.store.cancel_refetch(&self.key) {
            warn!(key = %self.key, error = %e, "Failed to cancel refetch before retry");
        }
        let value = self.remote.call().await?;
        let version = self
            .store
            .set(self.key.clone(), value)
            .map_err(|e| RemoteError::new(e.to_string()))?;
        debug!(key = %self.key, attempt, version, "Retried mutation committed");
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
