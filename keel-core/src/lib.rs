//! KEEL Core - Shared Types
//!
//! Pure data structures shared by every KEEL crate: the error taxonomy,
//! recovery actions, the failure context passed through the recovery
//! pipeline, boundary wire types and configuration. This crate contains no
//! runtime and no I/O.

pub mod config;
pub mod constants;
pub mod context;
pub mod enums;
pub mod error;
pub mod remote;

pub use config::{CoordinatorConfig, KeelConfig, RecoveryConfig};
pub use context::{ErrorContext, RecoveryRequest, RecoveryResponse, RecoveryResult};
pub use enums::{ErrorKind, ErrorKindParseError, RecoveryAction, RecoveryActionParseError};
pub use error::{
    CacheError, ConfigError, KeelError, KeelResult, MutationError, RecoveryError,
};
pub use remote::RemoteError;

use chrono::{DateTime, Utc};
use uuid::Uuid;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Free-form metadata attached to failures and broadcast payloads.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entity_ids_are_sortable() {
        let first = new_entity_id();
        let second = new_entity_id();
        assert_ne!(first, second);
        assert!(first <= second);
    }
}
