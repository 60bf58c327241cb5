//! Tagged failure returned by remote operations.

use crate::enums::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A failure reported by the remote store or one of its procedures.
///
/// Collaborators that already know the kind of failure set `kind`; those
/// that only expose a vendor code set `code`. Either one is preferred over
/// message inspection when the failure is classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Structured classification supplied by the collaborator.
    pub kind: Option<ErrorKind>,
    /// Vendor or protocol error code (e.g. a SQLSTATE or HTTP status).
    pub code: Option<String>,
    /// Human-readable message as reported.
    pub message: String,
}

impl RemoteError {
    /// Failure with only a message; classification falls back to patterns.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            code: None,
            message: message.into(),
        }
    }

    /// Failure already classified by the collaborator.
    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            code: None,
            message: message.into(),
        }
    }

    /// Failure carrying a collaborator error code.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: None,
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.code) {
            (Some(kind), _) => write!(f, "[{}] {}", kind, self.message),
            (None, Some(code)) => write!(f, "[{}] {}", code, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RemoteError {}
