//! Mutation outcomes.

use keel_cache::RollbackStatus;
use keel_core::{ErrorKind, RecoveryResult, RemoteError};
use tokio::sync::oneshot;

/// Result of one optimistic mutation, available as soon as the cache has
/// settled locally.
#[derive(Debug)]
pub enum MutationOutcome<T> {
    /// The remote write succeeded and its value is committed.
    Committed { value: T, version: u64 },
    /// The remote write failed and the optimistic value was undone.
    RolledBack {
        error_kind: ErrorKind,
        rollback: RollbackStatus,
        error: RemoteError,
        /// Recovery runs in the background; await it for the final result.
        recovery: PendingRecovery,
    },
}

impl<T> MutationOutcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, MutationOutcome::Committed { .. })
    }

    pub fn committed_value(&self) -> Option<&T> {
        match self {
            MutationOutcome::Committed { value, .. } => Some(value),
            MutationOutcome::RolledBack { .. } => None,
        }
    }

    /// Wait for the recovery result of a rolled-back mutation.
    pub async fn recovery(self) -> Option<RecoveryResult> {
        match self {
            MutationOutcome::Committed { .. } => None,
            MutationOutcome::RolledBack { recovery, .. } => Some(recovery.wait().await),
        }
    }
}

/// Handle to a recovery running in the background.
#[derive(Debug)]
pub struct PendingRecovery {
    rx: oneshot::Receiver<RecoveryResult>,
}

impl PendingRecovery {
    pub(crate) fn new(rx: oneshot::Receiver<RecoveryResult>) -> Self {
        Self { rx }
    }

    /// Wait for the recovery to finish.
    ///
    /// If the recovery task was lost (runtime shut down), the failure is
    /// reported as needing manual intervention.
    pub async fn wait(self) -> RecoveryResult {
        self.rx.await.unwrap_or_else(|_| {
            RecoveryResult::manual_intervention(
                "Recovery task ended without reporting a result",
                Some("recovery task dropped".to_string()),
            )
        })
    }
}
