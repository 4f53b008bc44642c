//! `PubSub` (SPEC_FULL.md §4.7): an internal typed-event bus, one topic per
//! auction (`auction:{id}`). Delivering these events to an external
//! WebSocket/SSE client is the excluded "notification delivery transport"
//! non-goal — this crate stops at handing a subscriber a `tokio::broadcast`
//! receiver of [`Event`]s.
//!
//! Grounded on the teacher's `websocket/ws_broadcast_service.rs`
//! `ConnectionManager`, which keeps a `DashMap` of per-symbol fan-out
//! channels rather than one global channel everyone filters.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::domain::Event;

/// Backlog depth per topic. A slow subscriber that falls this far behind
/// gets `RecvError::Lagged` on its next `recv()` rather than back-pressuring
/// publishers — publishing must never block on a reader.
const CHANNEL_CAPACITY: usize = 256;

#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publishes `event` to its topic (`event.topic()`). A topic with no
    /// subscribers silently drops the event — there's nothing to snapshot
    /// server-side per the "snapshot-on-join is sufficient" resolution
    /// (SPEC_FULL.md Open Question 4); a joining subscriber gets the current
    /// `Auction`/leaderboard state directly from `AuctionService`, not a
    /// replay of events it missed.
    fn publish(&self, event: Event);

    /// Subscribes to a topic, creating its channel if this is the first
    /// subscriber.
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Event>;
}

/// Single-process pub/sub: one `broadcast::Sender` per topic, sharded in a
/// `DashMap` the same way the teacher's `ConnectionManager` shards by symbol.
#[derive(Default)]
pub struct InProcessPubSub {
    topics: DashMap<String, broadcast::Sender<Event>>,
}

impl InProcessPubSub {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PubSub for InProcessPubSub {
    fn publish(&self, event: Event) {
        let topic = event.topic();
        if let Some(sender) = self.topics.get(&topic) {
            // Err means zero receivers; dropping the event is correct, not
            // an error condition.
            let _ = sender.send(event);
        }
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Event> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::AuctionId;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = InProcessPubSub::new();
        let auction_id = AuctionId::new();
        let topic = format!("auction:{auction_id}");
        let mut rx = bus.subscribe(&topic);

        bus.publish(Event::AuctionComplete { auction_id });

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, Event::AuctionComplete { .. }));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = InProcessPubSub::new();
        let auction_id = AuctionId::new();
        bus.publish(Event::AuctionComplete { auction_id });
    }

    #[tokio::test]
    async fn separate_topics_do_not_cross_talk() {
        let bus = InProcessPubSub::new();
        let a1 = AuctionId::new();
        let a2 = AuctionId::new();
        let mut rx1 = bus.subscribe(&format!("auction:{a1}"));
        let _rx2 = bus.subscribe(&format!("auction:{a2}"));

        bus.publish(Event::AuctionComplete { auction_id: a2 });

        assert!(rx1.try_recv().is_err());
    }
}
