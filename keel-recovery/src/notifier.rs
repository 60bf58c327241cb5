//! Side-channel notification for failures that need a human.

use async_trait::async_trait;
use keel_core::{ErrorContext, RecoveryError};
use tracing::error;

/// Best-effort operator alert. Failures to notify are logged by the
/// executor and never change the recovery result.
#[async_trait]
pub trait InterventionNotifier: Send + Sync {
    async fn notify(&self, context: &ErrorContext, reason: &str) -> Result<(), RecoveryError>;
}

/// Notifier that writes an error-level log event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl InterventionNotifier for TracingNotifier {
    async fn notify(&self, context: &ErrorContext, reason: &str) -> Result<(), RecoveryError> {
        error!(
            error_kind = %context.error_kind,
            operation = %context.operation,
            entity_id = ?context.related_entity_id,
            user_id = ?context.related_user_id,
            retry_count = context.retry_count,
            original_message = %context.original_message,
            reason = reason,
            "Manual intervention required"
        );
        Ok(())
    }
}
