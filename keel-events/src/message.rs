//! Broadcast message format.

use chrono::Utc;
use keel_cache::CacheKey;
use keel_core::{EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Event announced to other cache holders after a change settles.
///
/// `keys` lists the cache keys the sender invalidated; receivers invalidate
/// the same keys in their own stores. `origin` identifies the sender so a
/// holder can skip its own announcements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// Event name (e.g. `mutation_committed`).
    pub event: String,
    /// Free-form event payload.
    pub payload: JsonValue,
    /// Cache keys affected by the change.
    #[serde(default)]
    pub keys: Vec<CacheKey>,
    /// Cache holder that sent the message.
    pub origin: EntityId,
    pub sent_at: Timestamp,
}

impl BroadcastMessage {
    pub fn new(
        event: impl Into<String>,
        payload: JsonValue,
        keys: Vec<CacheKey>,
        origin: EntityId,
    ) -> Self {
        Self {
            event: event.into(),
            payload,
            keys,
            origin,
            sent_at: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event
    }
}
