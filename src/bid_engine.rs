//! `BidEngine` (SPEC_FULL.md §4.5): validates and commits a single bid.
//!
//! Steps, matching the spec's six-step algorithm:
//! 1. Pluggable [`AdmissionGuard`] check (rate limiting, ban lists — left to
//!    the embedding application, SPEC_FULL.md §4.5 "pluggable admission"
//!    resolution).
//! 2. Cheap pre-read of the auction to bail out of an inactive auction
//!    before ever taking the per-auction lock.
//! 3. Acquire the `auction:{id}:bid` lock so concurrent bidders on the same
//!    auction serialize instead of racing each other's `Store::place_bid`
//!    retries.
//! 4. `Store::place_bid` — the atomic re-validate/freeze/insert/extend.
//! 5. Leaderboard reposition and `NewBid`/`AntiSnipingExtended` events.
//! 6. Audit log entries.
//!
//! Grounded on the teacher's `funding/service.rs` `TransferService::execute`
//! for the "validate, then one atomic store call, then emit" shape.

use std::sync::Arc;

use chrono::Duration;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::core_types::{Amount, AuctionId, UserId};
use crate::domain::{AuditEvent, AuditLog, Bid, Event};
use crate::error::{AppError, AppResult};
use crate::leaderboard::LeaderboardIndex;
use crate::locks::{bid_lock_key, with_lock, Locks};
use crate::pubsub::PubSub;
use crate::store::Store;

/// Pluggable admission check run before any lock or store access
/// (SPEC_FULL.md §4.5). The spec deliberately keeps rate limiting out of the
/// core: an embedding application supplies whatever policy (token bucket,
/// ban list, KYC gate) it needs.
pub trait AdmissionGuard: Send + Sync {
    fn admit(&self, auction_id: AuctionId, user_id: UserId) -> AppResult<()>;
}

/// Default guard: admits everyone. Production deployments supply their own.
pub struct AllowAll;

impl AdmissionGuard for AllowAll {
    fn admit(&self, _auction_id: AuctionId, _user_id: UserId) -> AppResult<()> {
        Ok(())
    }
}

pub struct BidEngine {
    store: Arc<dyn Store>,
    locks: Arc<dyn Locks>,
    leaderboard: Arc<LeaderboardIndex>,
    pubsub: Arc<dyn PubSub>,
    clock: Arc<dyn Clock>,
    config: Arc<AppConfig>,
    admission: Arc<dyn AdmissionGuard>,
}

impl BidEngine {
    pub fn new(
        store: Arc<dyn Store>,
        locks: Arc<dyn Locks>,
        leaderboard: Arc<LeaderboardIndex>,
        pubsub: Arc<dyn PubSub>,
        clock: Arc<dyn Clock>,
        config: Arc<AppConfig>,
        admission: Arc<dyn AdmissionGuard>,
    ) -> Self {
        Self { store, locks, leaderboard, pubsub, clock, config, admission }
    }

    pub async fn place_bid(&self, auction_id: AuctionId, user_id: UserId, amount: Amount) -> AppResult<Bid> {
        if amount == 0 || amount > self.config.max_bid_amount {
            return Err(AppError::BidTooLow { auction_id, amount, min: 1 });
        }
        self.admission.admit(auction_id, user_id)?;

        let auction = self
            .store
            .find_auction(auction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("auction {auction_id}")))?;
        if !auction.is_active() {
            return Err(AppError::AuctionNotActive(auction_id));
        }

        let anti_snipe_window = Duration::minutes(auction.spec.anti_snipe_window_minutes);
        let anti_snipe_extension = Duration::minutes(auction.spec.anti_snipe_extension_minutes);
        let max_extensions = auction.spec.max_extensions;

        let store = self.store.clone();
        let key = bid_lock_key(auction_id);
        let now = self.clock.now();

        let result = with_lock(self.locks.as_ref(), &key, self.config.bid_lock_lease, move || async move {
            store
                .place_bid(crate::store::PlaceBidCommand {
                    auction_id,
                    user_id,
                    amount,
                    now,
                    anti_snipe_window,
                    anti_snipe_extension,
                    max_extensions,
                })
                .await
        })
        .await;
        // `Locks::acquire` surfaces a busy lease as `LockBusy`; client-facing
        // backpressure for bid placement is `Contended` instead (SPEC_FULL.md
        // §5), since `is_retryable_by_client` is what tells callers to retry
        // with jitter rather than give up.
        let committed = match result {
            Err(AppError::LockBusy(_)) => return Err(AppError::Contended(auction_id)),
            other => other?,
        };

        self.leaderboard.upsert(
            auction_id,
            committed.bid.id,
            user_id,
            committed.bid.amount,
            committed.bid.arrival_seq,
        );

        let rank = self.leaderboard.rank_of(auction_id, committed.bid.id).unwrap_or(0);
        self.pubsub.publish(Event::NewBid { auction_id, user_id, amount, rank, at: now });

        let audit_event = match committed.previous_amount {
            Some(previous) => AuditEvent::BidAdjustFreeze {
                auction_id,
                bid_id: committed.bid.id,
                user_id,
                delta: amount as i64 - previous as i64,
            },
            None => AuditEvent::BidFreeze { auction_id, bid_id: committed.bid.id, user_id, amount },
        };
        let _ = self.store.append_audit_log(AuditLog::new(audit_event, now)).await;

        if let Some(ext) = &committed.extension {
            self.pubsub.publish(Event::AntiSnipingExtended {
                auction_id,
                round_number: auction.current_round,
                new_end_time: ext.new_end_time,
                extensions_count: ext.extensions_count,
            });
            let _ = self
                .store
                .append_audit_log(AuditLog::new(
                    AuditEvent::RoundExtended {
                        auction_id,
                        round: auction.current_round,
                        new_end_time: ext.new_end_time,
                        extensions_count: ext.extensions_count,
                    },
                    now,
                ))
                .await;
        }

        // Derived state event: subscribers converge on this rather than
        // diffing `NewBid`/`AntiSnipingExtended` themselves (SPEC_FULL.md §7).
        if let Some(refreshed) = self.store.find_auction(auction_id).await? {
            self.pubsub.publish(Event::AuctionUpdate { auction: refreshed });
        }

        Ok(committed.bid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Auction, AuctionSpec, RoundConfig, User};
    use crate::locks::InMemoryLocks;
    use crate::pubsub::InProcessPubSub;
    use crate::store::InMemoryStore;
    use crate::clock::MockClock;

    fn test_spec() -> AuctionSpec {
        AuctionSpec {
            title: "t".into(),
            description: None,
            total_items: 2,
            rounds_config: vec![RoundConfig { items_count: 2, duration_minutes: 10 }],
            min_bid_amount: 100,
            min_bid_increment: 10,
            anti_snipe_window_minutes: 2,
            anti_snipe_extension_minutes: 5,
            max_extensions: 3,
            bots_enabled: false,
            bot_count: 0,
        }
    }

    async fn harness() -> (BidEngine, Arc<InMemoryStore>, Arc<MockClock>, AuctionId, UserId) {
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

        let mut auction = Auction::new(owner.id, test_spec());
        auction.start(clock.now()).unwrap();
        let auction_id = auction.id;
        store.create_auction(auction).await.unwrap();

        let engine = BidEngine::new(
            store.clone(),
            locks,
            leaderboard,
            pubsub,
            clock.clone() as Arc<dyn Clock>,
            config,
            Arc::new(AllowAll),
        );
        (engine, store, clock, auction_id, bidder.id)
    }

    #[tokio::test]
    async fn first_bid_freezes_and_is_active() {
        let (engine, store, _clock, auction_id, bidder) = harness().await;
        let bid = engine.place_bid(auction_id, bidder, 150).await.unwrap();
        assert_eq!(bid.amount, 150);

        let user = store.find_user(bidder).await.unwrap().unwrap();
        assert_eq!(user.balance.frozen(), 150);
        assert_eq!(user.balance.avail(), 10_000 - 150);
    }

    #[tokio::test]
    async fn bid_below_minimum_is_rejected() {
        let (engine, _store, _clock, auction_id, bidder) = harness().await;
        let result = engine.place_bid(auction_id, bidder, 50).await;
        assert!(matches!(result, Err(AppError::BidTooLow { .. })));
    }

    #[tokio::test]
    async fn duplicate_amount_from_another_bidder_is_rejected() {
        let (engine, store, clock, auction_id, bidder) = harness().await;
        engine.place_bid(auction_id, bidder, 150).await.unwrap();

        let other = User::new("other", false, clock.now());
        store.create_user(other.clone()).await.unwrap();
        store.wallet_deposit(other.id, 10_000, clock.now()).await.unwrap();

        let result = engine.place_bid(auction_id, other.id, 150).await;
        assert!(matches!(result, Err(AppError::AmountTaken { .. })));
    }

    #[tokio::test]
    async fn bid_inside_anti_snipe_window_extends_round() {
        let (engine, store, clock, auction_id, bidder) = harness().await;
        clock.advance(chrono::Duration::minutes(9)); // 1 minute left, window is 2

        engine.place_bid(auction_id, bidder, 150).await.unwrap();

        let auction = store.find_auction(auction_id).await.unwrap().unwrap();
        let round = auction.current_round_state().unwrap();
        assert_eq!(round.extensions_count, 1);
    }
}
