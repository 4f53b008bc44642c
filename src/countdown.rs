//! `CountdownTicker` (SPEC_FULL.md §4.6, §6): emits `Countdown` events for
//! every active auction's current round at `COUNTDOWN_TICK_MS`.
//!
//! Grounded on the teacher's `config_watcher.rs` tick loop, the same idiom
//! [`crate::scheduler::RoundScheduler`] and [`crate::reconciler::LeaderboardReconciler`]
//! use: a `tokio::time::interval`, log-and-continue on a per-auction error,
//! a `watch<bool>` shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, instrument};

use crate::clock::Clock;
use crate::domain::Event;
use crate::pubsub::PubSub;
use crate::store::Store;

pub struct CountdownTicker {
    store: Arc<dyn Store>,
    pubsub: Arc<dyn PubSub>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
}

impl CountdownTicker {
    pub fn new(store: Arc<dyn Store>, pubsub: Arc<dyn PubSub>, clock: Arc<dyn Clock>, tick_interval: Duration) -> Self {
        Self { store, pubsub, clock, tick_interval }
    }

    /// Runs until `shutdown` fires. Intended to be spawned as its own task
    /// from the composition root.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn tick(&self) {
        let now = self.clock.now();
        let auction_ids = match self.store.list_active_auctions().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "failed to list active auctions for countdown");
                return;
            }
        };
        for auction_id in auction_ids {
            let auction = match self.store.find_auction(auction_id).await {
                Ok(Some(a)) => a,
                Ok(None) => continue,
                Err(e) => {
                    error!(%auction_id, error = %e, "failed to load auction for countdown");
                    continue;
                }
            };
            let Some(round) = auction.current_round_state() else { continue };
            let seconds_remaining = (round.end_time - now).num_seconds().max(0);
            self.pubsub.publish(Event::Countdown {
                auction_id,
                round_number: round.round_number,
                seconds_remaining,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::domain::{Auction, AuctionSpec, RoundConfig, User};
    use crate::pubsub::InProcessPubSub;
    use crate::store::InMemoryStore;

    fn spec() -> AuctionSpec {
        AuctionSpec {
            title: "t".into(),
            description: None,
            total_items: 1,
            rounds_config: vec![RoundConfig { items_count: 1, duration_minutes: 10 }],
            min_bid_amount: 100,
            min_bid_increment: 10,
            anti_snipe_window_minutes: 0,
            anti_snipe_extension_minutes: 0,
            max_extensions: 0,
            bots_enabled: false,
            bot_count: 0,
        }
    }

    #[tokio::test]
    async fn ticks_emit_countdown_for_each_active_auction() {
        let store = Arc::new(InMemoryStore::new());
        let pubsub = Arc::new(InProcessPubSub::new());
        let clock = Arc::new(MockClock::new(chrono::Utc::now()));

        let owner = User::new("owner", false, clock.now());
        store.create_user(owner.clone()).await.unwrap();
        let mut auction = Auction::new(owner.id, spec());
        auction.start(clock.now()).unwrap();
        let auction_id = auction.id;
        store.create_auction(auction).await.unwrap();

        let mut rx = pubsub.subscribe(&format!("auction:{auction_id}"));
        let ticker = CountdownTicker::new(
            store,
            pubsub,
            clock.clone() as Arc<dyn Clock>,
            Duration::from_millis(1_000),
        );
        ticker.tick().await;

        let event = rx.try_recv().expect("countdown event should have been published");
        match event {
            Event::Countdown { auction_id: id, round_number, seconds_remaining } => {
                assert_eq!(id, auction_id);
                assert_eq!(round_number, 1);
                assert_eq!(seconds_remaining, 600);
            }
            other => panic!("expected Countdown, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_active_auctions_emits_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let pubsub = Arc::new(InProcessPubSub::new());
        let clock = Arc::new(MockClock::new(chrono::Utc::now()));

        let ticker = CountdownTicker::new(store, pubsub, clock.clone() as Arc<dyn Clock>, Duration::from_millis(1_000));
        ticker.tick().await; // must not panic with nothing subscribed either
    }
}
