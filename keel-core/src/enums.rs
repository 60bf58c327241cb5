//! Enum types for the error taxonomy and recovery actions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ERROR KIND
// ============================================================================

/// Closed classification of every failure a remote operation can produce.
///
/// Kinds fall into three families that drive recovery:
/// - fail-fast kinds (`AuthenticationRequired`, `ValidationFailed`) are never
///   retried and never reach the recovery boundary
/// - domain kinds (`PaymentFailed`, `StockUpdateFailed`,
///   `OrderCreationFailed`) are compensated or rolled back, never retried
/// - transient kinds (`NotificationFailed`, `DatabaseError`, `NetworkError`)
///   are retried locally with backoff
///
/// `SystemError` is the total fallback and always escalates to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthenticationRequired,
    ValidationFailed,
    PaymentFailed,
    StockUpdateFailed,
    OrderCreationFailed,
    NotificationFailed,
    DatabaseError,
    NetworkError,
    SystemError,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 9] = [
        ErrorKind::AuthenticationRequired,
        ErrorKind::ValidationFailed,
        ErrorKind::PaymentFailed,
        ErrorKind::StockUpdateFailed,
        ErrorKind::OrderCreationFailed,
        ErrorKind::NotificationFailed,
        ErrorKind::DatabaseError,
        ErrorKind::NetworkError,
        ErrorKind::SystemError,
    ];

    /// Wire representation used by the recovery boundary.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthenticationRequired => "authentication_required",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::PaymentFailed => "payment_failed",
            ErrorKind::StockUpdateFailed => "stock_update_failed",
            ErrorKind::OrderCreationFailed => "order_creation_failed",
            ErrorKind::NotificationFailed => "notification_failed",
            ErrorKind::DatabaseError => "database_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::SystemError => "system_error",
        }
    }

    /// Transient infrastructure failures that may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::NotificationFailed | ErrorKind::DatabaseError | ErrorKind::NetworkError
        )
    }

    /// Failures that must surface to the user immediately with no retry and
    /// no recovery call.
    pub fn is_fail_fast(&self) -> bool {
        matches!(
            self,
            ErrorKind::AuthenticationRequired | ErrorKind::ValidationFailed
        )
    }

    /// Business operations whose partial side effects need undoing.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            ErrorKind::PaymentFailed | ErrorKind::StockUpdateFailed | ErrorKind::OrderCreationFailed
        )
    }

    /// Message suitable for showing to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::AuthenticationRequired => "Please sign in to continue.",
            ErrorKind::ValidationFailed => {
                "Some of the information provided is invalid. Please check and try again."
            }
            ErrorKind::PaymentFailed => {
                "Your payment could not be processed. No charge has been made."
            }
            ErrorKind::StockUpdateFailed => {
                "Not enough stock is available for this item."
            }
            ErrorKind::OrderCreationFailed => {
                "Your order could not be created. Please try again."
            }
            ErrorKind::NotificationFailed => {
                "Your request succeeded but the confirmation message could not be sent."
            }
            ErrorKind::DatabaseError => "A temporary storage problem occurred. Retrying.",
            ErrorKind::NetworkError => "Connection problem. Retrying.",
            ErrorKind::SystemError => {
                "Something went wrong. Our team has been notified."
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = ErrorKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "authenticationrequired" => Ok(ErrorKind::AuthenticationRequired),
            "validationfailed" => Ok(ErrorKind::ValidationFailed),
            "paymentfailed" => Ok(ErrorKind::PaymentFailed),
            "stockupdatefailed" => Ok(ErrorKind::StockUpdateFailed),
            "ordercreationfailed" => Ok(ErrorKind::OrderCreationFailed),
            "notificationfailed" => Ok(ErrorKind::NotificationFailed),
            "databaseerror" => Ok(ErrorKind::DatabaseError),
            "networkerror" => Ok(ErrorKind::NetworkError),
            "systemerror" => Ok(ErrorKind::SystemError),
            _ => Err(ErrorKindParseError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid error kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorKindParseError(pub String);

impl fmt::Display for ErrorKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid error kind: {}", self.0)
    }
}

impl std::error::Error for ErrorKindParseError {}

// ============================================================================
// RECOVERY ACTION
// ============================================================================

/// What the recovery executor does about a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Re-run the original operation with capped exponential backoff.
    Retry,
    /// Discard a partially created remote record.
    Rollback,
    /// Undo the side effects of a partially completed operation.
    Compensate,
    /// Stop and hand the failure to a human.
    ManualIntervention,
    /// Drop the failure; the primary operation does not depend on it.
    Ignore,
}

impl RecoveryAction {
    /// Wire representation used by the recovery boundary.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::Retry => "retry",
            RecoveryAction::Rollback => "rollback",
            RecoveryAction::Compensate => "compensate",
            RecoveryAction::ManualIntervention => "manual_intervention",
            RecoveryAction::Ignore => "ignore",
        }
    }

    /// Actions that are carried out by the remote recovery boundary.
    pub fn is_escalation(&self) -> bool {
        matches!(self, RecoveryAction::Rollback | RecoveryAction::Compensate)
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RecoveryAction {
    type Err = RecoveryActionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "retry" => Ok(RecoveryAction::Retry),
            "rollback" => Ok(RecoveryAction::Rollback),
            "compensate" => Ok(RecoveryAction::Compensate),
            "manualintervention" => Ok(RecoveryAction::ManualIntervention),
            "ignore" => Ok(RecoveryAction::Ignore),
            _ => Err(RecoveryActionParseError(s.to_string())),
        }
    }
}

/// Error when parsing an invalid recovery action string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryActionParseError(pub String);

impl fmt::Display for RecoveryActionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid recovery action: {}", self.0)
    }
}

impl std::error::Error for RecoveryActionParseError {}

fn normalize_token(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_error_kind_families_are_disjoint() {
        for kind in ErrorKind::ALL {
            let families = [kind.is_retryable(), kind.is_fail_fast(), kind.is_domain()]
                .iter()
                .filter(|f| **f)
                .count();
            assert!(families <= 1, "{kind} belongs to more than one family");
        }
        assert!(!ErrorKind::SystemError.is_retryable());
        assert!(!ErrorKind::SystemError.is_fail_fast());
    }

    #[test]
    fn test_error_kind_parses_both_spellings() {
        assert_eq!(
            "StockUpdateFailed".parse::<ErrorKind>().unwrap(),
            ErrorKind::StockUpdateFailed
        );
        assert_eq!(
            "stock_update_failed".parse::<ErrorKind>().unwrap(),
            ErrorKind::StockUpdateFailed
        );
        assert!("stock".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_recovery_action_wire_format() {
        let json = serde_json::to_string(&RecoveryAction::ManualIntervention).unwrap();
        assert_eq!(json, "\"manual_intervention\"");
        let parsed: RecoveryAction = serde_json::from_str("\"compensate\"").unwrap();
        assert_eq!(parsed, RecoveryAction::Compensate);
    }

    #[test]
    fn test_escalation_actions() {
        assert!(RecoveryAction::Compensate.is_escalation());
        assert!(RecoveryAction::Rollback.is_escalation());
        assert!(!RecoveryAction::Retry.is_escalation());
        assert!(!RecoveryAction::ManualIntervention.is_escalation());
    }

    fn error_kind_strategy() -> impl Strategy<Value = ErrorKind> {
        proptest::sample::select(ErrorKind::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Display output always parses back to the same kind.
        #[test]
        fn prop_error_kind_display_parses(kind in error_kind_strategy()) {
            let parsed: ErrorKind = kind.to_string().parse().expect("display must parse");
            prop_assert_eq!(parsed, kind);
        }

        /// Serde and `as_str` agree on the wire name.
        #[test]
        fn prop_error_kind_serde_matches_as_str(kind in error_kind_strategy()) {
            let json = serde_json::to_string(&kind).expect("serialize");
            prop_assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
