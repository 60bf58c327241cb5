//! Error types for KEEL operations

use thiserror::Error;

/// Cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("No cache entry for key {key}")]
    MissingEntry { key: String },

    #[error("Refetch failed for key {key}: {reason}")]
    RefetchFailed { key: String, reason: String },
}

/// Recovery pipeline errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecoveryError {
    /// The boundary could not be reached or the call itself failed. The
    /// display output is the collaborator's message, verbatim.
    #[error("{message}")]
    BoundaryUnavailable { message: String },

    #[error("Recovery boundary rejected request for {operation}: {reason}")]
    BoundaryRejected { operation: String, reason: String },

    #[error("Invalid recovery transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Intervention notifier failed: {reason}")]
    NotifierFailed { reason: String },
}

/// Optimistic mutation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error("Cache failure during {phase} of {key}: {source}")]
    Cache {
        key: String,
        phase: String,
        #[source]
        source: CacheError,
    },

    #[error("Mutation coordinator is shutting down")]
    ShuttingDown,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all KEEL errors.
#[derive(Debug, Clone, Error)]
pub enum KeelError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Mutation error: {0}")]
    Mutation(#[from] MutationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for KEEL operations.
pub type KeelResult<T> = Result<T, KeelError>;

// =============================================================================
// TESTS
// =============================================================================
