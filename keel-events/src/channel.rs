//! Broadcast channels.
//!
//! A channel carries [`BroadcastMessage`]s between cache holders. Delivery
//! is best-effort: a send with no listeners is dropped, and a listener that
//! falls more than `capacity` messages behind skips ahead and is told how
//! many it missed.

use futures_util::stream::{self, Stream};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::message::BroadcastMessage;

/// Fire-and-forget transport between cache holders.
pub trait BroadcastChannel: Send + Sync {
    /// Send a message. Returns the number of listeners it reached.
    fn send(&self, message: BroadcastMessage) -> usize;

    /// Receive every message sent after this call.
    fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage>;
}

/// In-process channel built on a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct LocalBroadcastChannel {
    tx: broadcast::Sender<BroadcastMessage>,
}

impl LocalBroadcastChannel {
    /// Create a channel that buffers up to `capacity` messages per listener.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0; `CoordinatorConfig::validate` rejects that.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl BroadcastChannel for LocalBroadcastChannel {
    fn send(&self, message: BroadcastMessage) -> usize {
        let event = message.event.clone();
        match self.tx.send(message) {
            Ok(receivers) => {
                debug!(event = %event, receivers, "Broadcast event");
                receivers
            }
            Err(_) => {
                // No listeners connected - this is fine
                debug!(event = %event, "No receivers for event");
                0
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.tx.subscribe()
    }
}

/// One item read from a broadcast receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Message(BroadcastMessage),
    /// The listener fell behind and this many messages were dropped.
    Lagged(u64),
}

/// Adapt a receiver into a stream that ends when the channel closes.
pub fn deliveries(
    rx: broadcast::Receiver<BroadcastMessage>,
) -> impl Stream<Item = Delivery> + Send {
    stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(message) => Some((Delivery::Message(message), rx)),
            Err(RecvError::Lagged(skipped)) => Some((Delivery::Lagged(skipped), rx)),
            Err(RecvError::Closed) => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use keel_core::new_entity_id;

    fn message(event: &str) -> BroadcastMessage {
        BroadcastMessage::new(event, serde_json::Value::Null, Vec::new(), new_entity_id())
    }

    #[test]
    fn test_send_without_listeners_is_dropped() {
        let channel = LocalBroadcastChannel::new(8);
        assert_eq!(channel.send(message("mutation_committed")), 0);
    }

    #[tokio::test]
    async fn test_listeners_receive_in_order() {
        let channel = LocalBroadcastChannel::new(8);
        let mut rx = channel.subscribe();
        assert_eq!(channel.receiver_count(), 1);

        assert_eq!(channel.send(message("first")), 1);
        channel.send(message("second"));

        assert_eq!(rx.recv().await.unwrap().event, "first");
        assert_eq!(rx.recv().await.unwrap().event, "second");
    }

    #[tokio::test]
    async fn test_stream_reports_lag_and_ends_on_close() {
        let channel = LocalBroadcastChannel::new(2);
        let rx = channel.subscribe();
        for i in 0..5 {
            channel.send(message(&format!("event-{}", i)));
        }
        drop(channel);

        let items: Vec<Delivery> = deliveries(rx).collect().await;
        assert_eq!(items[0], Delivery::Lagged(3));
        let events: Vec<&str> = items[1..]
            .iter()
            .map(|d| match d {
                Delivery::Message(m) => m.event.as_str(),
                Delivery::Lagged(_) => "lagged",
            })
            .collect();
        assert_eq!(events, vec!["event-3", "event-4"]);
    }
}
