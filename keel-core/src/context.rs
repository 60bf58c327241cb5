//! Failure context, recovery results and recovery boundary wire types.

use crate::enums::{ErrorKind, RecoveryAction};
use crate::{new_entity_id, EntityId, Metadata, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ============================================================================
// ERROR CONTEXT
// ============================================================================

/// Everything known about a failure at the moment it happened.
///
/// Created once by the caller or the mutation coordinator and passed by
/// value through classification, resolution and execution. Builder methods
/// consume and return `self`; nothing mutates a context after it has been
/// handed to the executor.
///
/// `failure_id` is minted by [`ErrorContext::new`] and survives cloning, so
/// redelivering one failure keeps its identity while a new failure of the
/// same operation on the same entity gets a fresh one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    #[serde(default = "new_entity_id")]
    pub failure_id: EntityId,
    pub error_kind: ErrorKind,
    /// Name of the operation that failed (e.g. `add_to_cart`).
    pub operation: String,
    /// Entity the operation targeted (order, product, cart line).
    pub related_entity_id: Option<String>,
    /// User on whose behalf the operation ran.
    pub related_user_id: Option<String>,
    pub original_message: String,
    /// Attempts already made before this context was built.
    pub retry_count: u32,
    pub timestamp: Timestamp,
    pub metadata: Metadata,
}

impl ErrorContext {
    pub fn new(
        error_kind: ErrorKind,
        operation: impl Into<String>,
        original_message: impl Into<String>,
    ) -> Self {
        Self {
            failure_id: new_entity_id(),
            error_kind,
            operation: operation.into(),
            related_entity_id: None,
            related_user_id: None,
            original_message: original_message.into(),
            retry_count: 0,
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.related_entity_id = Some(entity_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.related_user_id = Some(user_id.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_metadata_map(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }
}

// ============================================================================
// RECOVERY RESULT
// ============================================================================

/// Terminal outcome of one recovery chain.
///
/// `compensation_applied` is only ever true when exactly one compensating
/// or rollback call reported success for the originating context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub action: RecoveryAction,
    pub attempts: u32,
    pub recovered: bool,
    pub compensation_applied: bool,
    pub message: String,
    pub error: Option<String>,
}

impl RecoveryResult {
    /// Failure dropped on purpose.
    pub fn ignored(message: impl Into<String>) -> Self {
        Self {
            success: true,
            action: RecoveryAction::Ignore,
            attempts: 0,
            recovered: true,
            compensation_applied: false,
            message: message.into(),
            error: None,
        }
    }

    /// Failure handed to a human; nothing was attempted.
    pub fn manual_intervention(message: impl Into<String>, error: Option<String>) -> Self {
        Self {
            success: false,
            action: RecoveryAction::ManualIntervention,
            attempts: 0,
            recovered: false,
            compensation_applied: false,
            message: message.into(),
            error,
        }
    }

    /// The original operation succeeded on attempt `attempts`.
    pub fn retried(attempts: u32) -> Self {
        Self {
            success: true,
            action: RecoveryAction::Retry,
            attempts,
            recovered: true,
            compensation_applied: false,
            message: format!("Operation succeeded after {} attempt(s)", attempts),
            error: None,
        }
    }

    /// Whether the chain changed remote state and caches should refresh.
    pub fn changed_state(&self) -> bool {
        (self.action == RecoveryAction::Retry && self.success) || self.compensation_applied
    }
}

// ============================================================================
// RECOVERY BOUNDARY WIRE TYPES
// ============================================================================

/// Request sent to the atomic recovery boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    /// Identity of the failure being recovered; boundaries may key their
    /// own idempotency on it.
    #[serde(default = "new_entity_id")]
    pub failure_id: EntityId,
    pub error_kind: ErrorKind,
    /// Action the executor resolved; the boundary may refine it.
    pub action: RecoveryAction,
    pub related_entity_id: Option<String>,
    pub related_user_id: Option<String>,
    pub operation: String,
    pub original_message: String,
    pub retry_count: u32,
    pub metadata: Metadata,
}

impl RecoveryRequest {
    pub fn from_context(context: &ErrorContext, action: RecoveryAction) -> Self {
        Self {
            failure_id: context.failure_id,
            error_kind: context.error_kind,
            action,
            related_entity_id: context.related_entity_id.clone(),
            related_user_id: context.related_user_id.clone(),
            operation: context.operation.clone(),
            original_message: context.original_message.clone(),
            retry_count: context.retry_count,
            metadata: context.metadata.clone(),
        }
    }
}

/// Structured outcome reported by the atomic recovery boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryResponse {
    pub success: bool,
    pub action: RecoveryAction,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub recovered: bool,
    #[serde(default)]
    pub compensation_applied: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl RecoveryResponse {
    pub fn succeeded(action: RecoveryAction, message: impl Into<String>) -> Self {
        Self {
            success: true,
            action,
            attempts: 1,
            recovered: true,
            compensation_applied: action.is_escalation(),
            message: message.into(),
            error: None,
        }
    }

    pub fn failed(action: RecoveryAction, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            action,
            attempts: 1,
            recovered: false,
            compensation_applied: false,
            error: Some(message.clone()),
            message,
        }
    }
}
