//! Error classification.
//!
//! Maps a [`RemoteError`] onto the closed [`ErrorKind`] taxonomy. The
//! classifier is deterministic and total: every input yields a kind and
//! `SystemError` is the fallback. Evidence is consulted strongest first:
//!
//! 1. the kind the collaborator attached to the error
//! 2. the collaborator's error code
//! 3. patterns in the message, transient infrastructure markers before
//!    domain words
//! 4. the name of the operation that failed
//!
//! Message patterns are a last-resort adapter for collaborators that only
//! report text.

use std::collections::HashMap;

use keel_core::{ErrorKind, RemoteError};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

/// Message patterns in precedence order. Authentication is checked before
/// validation so that "invalid token" is an auth failure, and stock before
/// payment so that "insufficient stock" is not read as "insufficient funds".
/// Network and database markers come before the payment, order and
/// notification patterns: "payment gateway timed out" is retried, not
/// compensated.
const MESSAGE_PATTERNS: &[(&str, ErrorKind)] = &[
    (
        r"(?i)(unauthori[sz]ed|not authenticated|authentication required|jwt expired|invalid (token|jwt|session)|session expired|permission denied|forbidden|not signed in|login required)",
        ErrorKind::AuthenticationRequired,
    ),
    (
        r"(?i)(insufficient stock|out of stock|not enough stock|stock unavailable|insufficient inventory|exceeds available stock)",
        ErrorKind::StockUpdateFailed,
    ),
    (
        r"(?i)(product not found|item not found|invalid|violates (check|not-null|foreign key) constraint|must be (positive|greater|at least)|required field|malformed|validation)",
        ErrorKind::ValidationFailed,
    ),
    (
        r"(?i)(network|timed? ?out|connection (refused|reset|closed|lost)|fetch failed|econn(reset|refused)|unreachable|dns|socket hang up)",
        ErrorKind::NetworkError,
    ),
    (
        r"(?i)(database|deadlock|could not serialize|too many connections|relation .+ does not exist|duplicate key|postgres|sql)",
        ErrorKind::DatabaseError,
    ),
    (
        r"(?i)(payment|card (was )?declined|insufficient funds|charge failed|refund)",
        ErrorKind::PaymentFailed,
    ),
    (
        r"(?i)((create|creating|place|placing) (the )?order|order creation)",
        ErrorKind::OrderCreationFailed,
    ),
    (
        r"(?i)(notification|e-?mail|smtp|webhook delivery|push message)",
        ErrorKind::NotificationFailed,
    ),
];

static COMPILED_PATTERNS: Lazy<Vec<(Regex, ErrorKind)>> = Lazy::new(|| {
    MESSAGE_PATTERNS
        .iter()
        .filter_map(|(pattern, kind)| Regex::new(pattern).ok().map(|re| (re, *kind)))
        .collect()
});

/// Operation-name fragments and the domain kind they imply.
const OPERATION_HINTS: &[(&str, ErrorKind)] = &[
    ("payment", ErrorKind::PaymentFailed),
    ("charge", ErrorKind::PaymentFailed),
    ("stock", ErrorKind::StockUpdateFailed),
    ("inventory", ErrorKind::StockUpdateFailed),
    ("order", ErrorKind::OrderCreationFailed),
    ("notif", ErrorKind::NotificationFailed),
    ("email", ErrorKind::NotificationFailed),
];

/// Deterministic failure classifier.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    codes: HashMap<String, ErrorKind>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        let mut codes = HashMap::new();
        // HTTP status codes
        for code in ["401", "403"] {
            codes.insert(code.to_string(), ErrorKind::AuthenticationRequired);
        }
        for code in ["400", "404", "409", "422"] {
            codes.insert(code.to_string(), ErrorKind::ValidationFailed);
        }
        codes.insert("402".to_string(), ErrorKind::PaymentFailed);
        for code in ["408", "502", "503", "504"] {
            codes.insert(code.to_string(), ErrorKind::NetworkError);
        }
        // SQLSTATE codes
        for code in ["28000", "28P01", "42501", "PGRST301"] {
            codes.insert(code.to_string(), ErrorKind::AuthenticationRequired);
        }
        for code in ["22P02", "23502", "23503", "23514"] {
            codes.insert(code.to_string(), ErrorKind::ValidationFailed);
        }
        for code in ["40001", "40P01", "53300", "57P01", "08006"] {
            codes.insert(code.to_string(), ErrorKind::DatabaseError);
        }
        Self { codes }
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an additional collaborator code to a kind.
    pub fn with_code(mut self, code: impl Into<String>, kind: ErrorKind) -> Self {
        self.codes.insert(code.into(), kind);
        self
    }

    /// Classify a failure, optionally using the failed operation's name.
    pub fn classify(&self, error: &RemoteError, operation_hint: Option<&str>) -> ErrorKind {
        if let Some(kind) = error.kind {
            return kind;
        }
        if let Some(kind) = error.code.as_deref().and_then(|code| self.codes.get(code)) {
            trace!(code = ?error.code, kind = %kind, "Classified by error code");
            return *kind;
        }
        self.classify_message(&error.message, operation_hint)
    }

    /// Classify from message text and operation name alone.
    pub fn classify_message(&self, message: &str, operation_hint: Option<&str>) -> ErrorKind {
        if let Some((_, kind)) = COMPILED_PATTERNS.iter().find(|(re, _)| re.is_match(message)) {
            trace!(kind = %kind, "Classified by message pattern");
            return *kind;
        }

        if let Some(hint) = operation_hint {
            let hint = hint.to_ascii_lowercase();
            if let Some((_, kind)) = OPERATION_HINTS.iter().find(|(fragment, _)| hint.contains(fragment)) {
                trace!(kind = %kind, operation = %hint, "Classified by operation hint");
                return *kind;
            }
        }

        ErrorKind::SystemError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn classify(message: &str) -> ErrorKind {
        ErrorClassifier::new().classify(&RemoteError::new(message), None)
    }

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(COMPILED_PATTERNS.len(), MESSAGE_PATTERNS.len());
    }

    #[test]
    fn test_structured_kind_wins() {
        let classifier = ErrorClassifier::new();
        let err = RemoteError {
            kind: Some(ErrorKind::PaymentFailed),
            code: Some("401".to_string()),
            message: "network timeout".to_string(),
        };
        assert_eq!(classifier.classify(&err, None), ErrorKind::PaymentFailed);
    }

    #[test]
    fn test_code_beats_message() {
        let classifier = ErrorClassifier::new();
        let err = RemoteError::with_code("40P01", "payment row locked");
        assert_eq!(classifier.classify(&err, None), ErrorKind::DatabaseError);

        let err = RemoteError::with_code("unknown-code", "card declined");
        assert_eq!(classifier.classify(&err, None), ErrorKind::PaymentFailed);
    }

    #[test]
    fn test_custom_codes() {
        let classifier = ErrorClassifier::new().with_code("P0001", ErrorKind::StockUpdateFailed);
        let err = RemoteError::with_code("P0001", "raise exception");
        assert_eq!(classifier.classify(&err, None), ErrorKind::StockUpdateFailed);
    }

    #[test]
    fn test_business_rule_failures() {
        assert_eq!(classify("Insufficient stock for product p-1"), ErrorKind::StockUpdateFailed);
        assert_eq!(classify("Product is OUT OF STOCK"), ErrorKind::StockUpdateFailed);
        assert_eq!(classify("Product not found"), ErrorKind::ValidationFailed);
        assert_eq!(classify("Invalid quantity"), ErrorKind::ValidationFailed);
        assert_eq!(classify("Insufficient funds"), ErrorKind::PaymentFailed);
    }

    #[test]
    fn test_auth_failures_are_distinct_from_validation() {
        assert_eq!(classify("JWT expired"), ErrorKind::AuthenticationRequired);
        assert_eq!(classify("invalid token"), ErrorKind::AuthenticationRequired);
        assert_eq!(classify("permission denied for table carts"), ErrorKind::AuthenticationRequired);
    }

    #[test]
    fn test_transient_failures() {
        assert_eq!(classify("Request timed out"), ErrorKind::NetworkError);
        assert_eq!(classify("connection reset by peer"), ErrorKind::NetworkError);
        assert_eq!(classify("deadlock detected"), ErrorKind::DatabaseError);
        assert_eq!(classify("failed to send email"), ErrorKind::NotificationFailed);
    }

    #[test]
    fn test_transient_markers_beat_domain_words() {
        assert_eq!(classify("payment gateway timed out"), ErrorKind::NetworkError);
        assert_eq!(classify("connection reset while creating order"), ErrorKind::NetworkError);
        assert_eq!(classify("notification service unreachable"), ErrorKind::NetworkError);
        assert_eq!(classify("deadlock detected while recording payment"), ErrorKind::DatabaseError);
        assert_eq!(classify("refund failed: too many connections"), ErrorKind::DatabaseError);
        // Without a transient marker the domain kind still applies.
        assert_eq!(classify("payment confirmation failed"), ErrorKind::PaymentFailed);
        assert_eq!(classify("failed to create order"), ErrorKind::OrderCreationFailed);
    }

    #[test]
    fn test_operation_hint_used_before_fallback() {
        let classifier = ErrorClassifier::new();
        let err = RemoteError::new("something odd happened");
        assert_eq!(classifier.classify(&err, Some("process_payment")), ErrorKind::PaymentFailed);
        assert_eq!(classifier.classify(&err, Some("create_order")), ErrorKind::OrderCreationFailed);
        assert_eq!(classifier.classify(&err, Some("add_to_cart")), ErrorKind::SystemError);
        assert_eq!(classifier.classify(&err, None), ErrorKind::SystemError);
    }

    #[test]
    fn test_boundary_failure_message_is_system_error() {
        assert_eq!(classify("function not found"), ErrorKind::SystemError);
        assert_eq!(classify(""), ErrorKind::SystemError);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Classification never panics and is deterministic.
        #[test]
        fn prop_classification_is_total_and_deterministic(
            message in ".{0,64}",
            code in proptest::option::of("[0-9A-Z]{3,5}"),
            hint in proptest::option::of("[a-z_]{0,16}"),
        ) {
            let classifier = ErrorClassifier::new();
            let err = RemoteError { kind: None, code, message };
            let first = classifier.classify(&err, hint.as_deref());
            let second = classifier.classify(&err, hint.as_deref());
            prop_assert_eq!(first, second);
        }
    }
}
