//! `RoundCloser` (SPEC_FULL.md §4.6): settles a round once its clock runs
//! out — ranks the leaderboard, assigns items to the top bids, carries or
//! refunds the rest, and advances the auction.
//!
//! Grounded on the teacher's `funding/service.rs` transactional shape (one
//! atomic store call) plus `config_watcher.rs`'s "never let one failure kill
//! the loop" tick style, picked up by [`crate::scheduler::RoundScheduler`].

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core_types::AuctionId;
use crate::domain::{AuditEvent, AuditLog, Event};
use crate::domain::events::BidWinner;
use crate::leaderboard::LeaderboardIndex;
use crate::locks::{close_lock_key, with_lock, Locks};
use crate::pubsub::PubSub;
use crate::store::{CloseRoundCommand, RoundWinner, Store};
use crate::error::AppResult;

pub struct RoundCloser {
    store: Arc<dyn Store>,
    locks: Arc<dyn Locks>,
    leaderboard: Arc<LeaderboardIndex>,
    pubsub: Arc<dyn PubSub>,
    close_lock_lease: std::time::Duration,
}

impl RoundCloser {
    pub fn new(
        store: Arc<dyn Store>,
        locks: Arc<dyn Locks>,
        leaderboard: Arc<LeaderboardIndex>,
        pubsub: Arc<dyn PubSub>,
        close_lock_lease: std::time::Duration,
    ) -> Self {
        Self { store, locks, leaderboard, pubsub, close_lock_lease }
    }

    /// Closes `auction_id`'s current round if it is due. A no-op (returns
    /// `Ok(false)`) if the round isn't due yet, is already closed by a
    /// concurrent worker, or the close lock is currently held elsewhere —
    /// the caller (`RoundScheduler`) just retries on its next tick
    /// (SPEC_FULL.md §8 scenario I, close-lock failover).
    pub async fn close_if_due(&self, auction_id: AuctionId, now: DateTime<Utc>) -> AppResult<bool> {
        let auction = match self.store.find_auction(auction_id).await? {
            Some(a) if a.is_active() => a,
            _ => return Ok(false),
        };
        let round = match auction.current_round_state() {
            Some(r) if !r.completed && r.end_time <= now => r.clone(),
            _ => return Ok(false),
        };

        let key = close_lock_key(auction_id, round.round_number);
        let store = self.store.clone();
        let leaderboard = self.leaderboard.clone();
        let top = leaderboard.top_n(auction_id, round.items_count);
        let winners: Vec<RoundWinner> = top
            .iter()
            .enumerate()
            .map(|(i, e)| RoundWinner {
                bid_id: e.bid_id,
                user_id: e.user_id,
                amount: e.amount,
                item_number: i as u32 + 1,
            })
            .collect();
        let round_number = round.round_number;
        let winners_for_event: Vec<BidWinner> = winners
            .iter()
            .map(|w| BidWinner { user_id: w.user_id, amount: w.amount, item_number: w.item_number })
            .collect();

        let result = with_lock(self.locks.as_ref(), &key, self.close_lock_lease, move || async move {
            store
                .close_round(CloseRoundCommand { auction_id, round_number, winners, now })
                .await
        })
        .await;

        let committed = match result {
            Ok(c) => c,
            Err(crate::error::AppError::LockBusy(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        if committed.already_closed {
            return Ok(false);
        }

        let winner_bid_ids: Vec<_> = committed
            .auction
            .rounds
            .get((round_number - 1) as usize)
            .map(|r| r.winner_bid_ids.clone())
            .unwrap_or_default();
        let mut to_drop = winner_bid_ids.clone();
        to_drop.extend(&committed.refunded_bid_ids);
        self.leaderboard.remove_many(auction_id, &to_drop);

        self.pubsub.publish(Event::RoundComplete {
            auction_id,
            round_number,
            winners: winners_for_event,
        });
        let _ = self
            .store
            .append_audit_log(AuditLog::new(
                AuditEvent::RoundClosed {
                    auction_id,
                    round: round_number,
                    winner_count: winner_bid_ids.len() as u32,
                },
                now,
            ))
            .await;

        if committed.auction.is_active() {
            if let Some(next_round) = committed.auction.current_round_state() {
                self.pubsub.publish(Event::RoundStart {
                    auction_id,
                    round_number: next_round.round_number,
                    items_count: next_round.items_count,
                    start_time: next_round.start_time,
                    end_time: next_round.end_time,
                });
            }
        } else {
            self.pubsub.publish(Event::AuctionComplete { auction_id });
            let _ = self
                .store
                .append_audit_log(AuditLog::new(
                    AuditEvent::AuctionCompleted {
                        auction_id,
                        total_items_awarded: committed.auction.past_winners.len() as u32,
                    },
                    now,
                ))
                .await;
        }

        // Derived state event: the round transition above changes current_round,
        // status, and past_winners, so subscribers need a fresh snapshot.
        self.pubsub.publish(Event::AuctionUpdate { auction: committed.auction });

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bid_engine::{AllowAll, BidEngine};
    use crate::clock::{Clock, MockClock};
    use crate::config::AppConfig;
    use crate::domain::{Auction, AuctionSpec, RoundConfig, User};
    use crate::locks::InMemoryLocks;
    use crate::pubsub::InProcessPubSub;
    use crate::store::InMemoryStore;

    fn two_round_spec() -> AuctionSpec {
        AuctionSpec {
            title: "t".into(),
            description: None,
            total_items: 2,
            rounds_config: vec![
                RoundConfig { items_count: 1, duration_minutes: 10 },
                RoundConfig { items_count: 1, duration_minutes: 10 },
            ],
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
    async fn single_winner_settles_and_advances_round() {
        let store = Arc::new(InMemoryStore::new());
        let locks = Arc::new(InMemoryLocks::new());
        let leaderboard = Arc::new(LeaderboardIndex::new());
        let pubsub = Arc::new(InProcessPubSub::new());
        let clock = Arc::new(MockClock::new(chrono::Utc::now()));
        let config = Arc::new(AppConfig::default());

        let owner = User::new("owner", false, clock.now());
        store.create_user(owner.clone()).await.unwrap();
        let bidder = User::new("bidder", false, clock.now());
        store.create_user(bidder.clone()).await.unwrap();
        store.wallet_deposit(bidder.id, 10_000, clock.now()).await.unwrap();

        let mut auction = Auction::new(owner.id, two_round_spec());
        auction.start(clock.now()).unwrap();
        let auction_id = auction.id;
        store.create_auction(auction).await.unwrap();

        let engine = BidEngine::new(
            store.clone(),
            locks.clone(),
            leaderboard.clone(),
            pubsub.clone(),
            clock.clone() as Arc<dyn Clock>,
            config.clone(),
            Arc::new(AllowAll),
        );
        engine.place_bid(auction_id, bidder.id, 150).await.unwrap();

        clock.advance(chrono::Duration::minutes(11));

        let closer = RoundCloser::new(store.clone(), locks, leaderboard, pubsub, config.close_lock_lease);
        let closed = closer.close_if_due(auction_id, clock.now()).await.unwrap();
        assert!(closed);

        let auction = store.find_auction(auction_id).await.unwrap().unwrap();
        assert_eq!(auction.current_round, 2);
        assert_eq!(auction.past_winners.len(), 1);

        let user = store.find_user(bidder.id).await.unwrap().unwrap();
        assert_eq!(user.balance.frozen(), 0); // settled, no longer frozen
        assert_eq!(user.balance.avail(), 10_000 - 150);
    }

    #[tokio::test]
    async fn not_due_round_is_a_noop() {
        let store = Arc::new(InMemoryStore::new());
        let locks = Arc::new(InMemoryLocks::new());
        let leaderboard = Arc::new(LeaderboardIndex::new());
        let pubsub = Arc::new(InProcessPubSub::new());
        let clock = Arc::new(MockClock::new(chrono::Utc::now()));
        let config = AppConfig::default();

        let owner = User::new("owner", false, clock.now());
        store.create_user(owner.clone()).await.unwrap();
        let mut auction = Auction::new(owner.id, two_round_spec());
        auction.start(clock.now()).unwrap();
        let auction_id = auction.id;
        store.create_auction(auction).await.unwrap();

        let closer = RoundCloser::new(store, locks, leaderboard, pubsub, config.close_lock_lease);
        let closed = closer.close_if_due(auction_id, clock.now()).await.unwrap();
        assert!(!closed);
    }
}
