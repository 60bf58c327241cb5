//! KEEL Events - Invalidation Broadcasting
//!
//! Best-effort notification between cache holders. This is not a durable
//! log: a holder that misses messages falls back to invalidating its whole
//! cache and refetching on demand.

pub mod broadcaster;
pub mod channel;
pub mod message;

pub use broadcaster::InvalidationBroadcaster;
pub use channel::{deliveries, BroadcastChannel, Delivery, LocalBroadcastChannel};
pub use message::BroadcastMessage;
