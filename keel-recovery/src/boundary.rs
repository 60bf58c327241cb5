//! The atomic recovery boundary.

use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{RecoveryError, RecoveryRequest, RecoveryResponse};

/// Remote procedure that performs a compensating or rollback action
/// atomically.
///
/// The executor calls it at most once per escalation decision. An `Err`
/// means the boundary could not be reached or did not run; a response with
/// `success == false` means it ran and declined to change state.
#[async_trait]
pub trait RecoveryBoundary: Send + Sync {
    async fn recover(&self, request: RecoveryRequest) -> Result<RecoveryResponse, RecoveryError>;
}

#[async_trait]
impl<B> RecoveryBoundary for Arc<B>
where
    B: RecoveryBoundary + ?Sized,
{
    async fn recover(&self, request: RecoveryRequest) -> Result<RecoveryResponse, RecoveryError> {
        (**self).recover(request).await
    }
}
