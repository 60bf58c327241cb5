//! Recovery strategy resolution and the recovery state machine.

use std::collections::HashMap;
use std::fmt;

use keel_core::{ErrorKind, RecoveryAction, RecoveryConfig, RecoveryError};

/// Default action for each error kind.
pub fn default_action(kind: ErrorKind) -> RecoveryAction {
    match kind {
        ErrorKind::PaymentFailed | ErrorKind::StockUpdateFailed => RecoveryAction::Compensate,
        ErrorKind::OrderCreationFailed => RecoveryAction::Rollback,
        ErrorKind::NotificationFailed | ErrorKind::DatabaseError | ErrorKind::NetworkError => {
            RecoveryAction::Retry
        }
        ErrorKind::SystemError
        | ErrorKind::AuthenticationRequired
        | ErrorKind::ValidationFailed => RecoveryAction::ManualIntervention,
    }
}

/// Resolves kinds to actions: the default table plus configured overrides.
///
/// Fail-fast kinds only accept `ManualIntervention` or `Ignore` overrides;
/// anything else falls back to the default.
#[derive(Debug, Clone, Default)]
pub struct StrategyResolver {
    overrides: HashMap<ErrorKind, RecoveryAction>,
}

impl StrategyResolver {
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            overrides: config.action_overrides.clone(),
        }
    }

    pub fn resolve(&self, kind: ErrorKind) -> RecoveryAction {
        match self.overrides.get(&kind) {
            Some(action) if !kind.is_fail_fast() => *action,
            Some(action @ (RecoveryAction::ManualIntervention | RecoveryAction::Ignore)) => *action,
            _ => default_action(kind),
        }
    }
}

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Position of one recovery chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryState {
    Attempting,
    Retrying,
    Escalating,
    Recovered,
    Failed,
}

/// Inputs that move a recovery chain forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryEvent {
    /// The failure was resolved to an action.
    Resolved(RecoveryAction),
    AttemptSucceeded,
    /// A retry failed with attempts remaining.
    AttemptFailed,
    RetriesExhausted,
    BoundarySucceeded,
    /// The boundary refused, reported failure, or could not be reached.
    BoundaryFailed,
}

impl RecoveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryState::Attempting => "attempting",
            RecoveryState::Retrying => "retrying",
            RecoveryState::Escalating => "escalating",
            RecoveryState::Recovered => "recovered",
            RecoveryState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryState::Recovered | RecoveryState::Failed)
    }

    /// Apply an event, rejecting transitions the machine does not allow.
    pub fn on(self, event: RecoveryEvent) -> Result<RecoveryState, RecoveryError> {
        use RecoveryEvent as E;
        use RecoveryState as S;

        let next = match (self, event) {
            (S::Attempting, E::Resolved(RecoveryAction::Retry)) => S::Retrying,
            (S::Attempting, E::Resolved(RecoveryAction::Compensate | RecoveryAction::Rollback)) => {
                S::Escalating
            }
            (S::Attempting, E::Resolved(RecoveryAction::ManualIntervention)) => S::Failed,
            (S::Attempting, E::Resolved(RecoveryAction::Ignore)) => S::Recovered,
            (S::Retrying, E::AttemptSucceeded) => S::Recovered,
            (S::Retrying, E::AttemptFailed) => S::Retrying,
            (S::Retrying, E::RetriesExhausted) => S::Escalating,
            (S::Escalating, E::BoundarySucceeded) => S::Recovered,
            (S::Escalating, E::BoundaryFailed) => S::Failed,
            (from, event) => {
                return Err(RecoveryError::InvalidTransition {
                    from: from.to_string(),
                    event: format!("{:?}", event),
                })
            }
        };
        Ok(next)
    }
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
