//! `AuctionService` (SPEC_FULL.md §6): the external operation surface.
//!
//! A plain async facade over the components this crate builds — no
//! HTTP/WebSocket parsing attached, since the transport layer is the
//! excluded non-goal (whatever wraps this in HTTP/RPC/WS calls these
//! methods directly). Grounded on the teacher's top-level `service.rs`,
//! which plays the same role: one struct holding `Arc`s to every
//! collaborator, one method per external operation, each a thin
//! validate-then-delegate wrapper.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::audit::{AuditEngine, AuditResponse};
use crate::bid_engine::{AdmissionGuard, AllowAll, BidEngine};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::core_types::{Amount, AuctionId, UserId};
use crate::domain::{Auction, AuctionSpec, Bid, User};
use crate::error::{AppError, AppResult};
use crate::leaderboard::LeaderboardIndex;
use crate::locks::Locks;
use crate::pubsub::PubSub;
use crate::round_closer::RoundCloser;
use crate::store::Store;

/// `GetLeaderboard`'s response shape (SPEC_FULL.md §6).
#[derive(Debug, Clone)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: UserId,
    pub amount: Amount,
    pub is_winning: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LeaderboardPage {
    pub entries: Vec<LeaderboardEntry>,
    pub total_count: u32,
    pub past_winners: Vec<(UserId, Amount, u32)>,
}

pub struct AuctionService {
    store: Arc<dyn Store>,
    locks: Arc<dyn Locks>,
    leaderboard: Arc<LeaderboardIndex>,
    pubsub: Arc<dyn PubSub>,
    clock: Arc<dyn Clock>,
    config: Arc<AppConfig>,
    bid_engine: Arc<BidEngine>,
    round_closer: Arc<RoundCloser>,
    audit: Arc<AuditEngine>,
}

impl AuctionService {
    pub fn new(
        store: Arc<dyn Store>,
        locks: Arc<dyn Locks>,
        leaderboard: Arc<LeaderboardIndex>,
        pubsub: Arc<dyn PubSub>,
        clock: Arc<dyn Clock>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self::with_admission(store, locks, leaderboard, pubsub, clock, config, Arc::new(AllowAll))
    }

    pub fn with_admission(
        store: Arc<dyn Store>,
        locks: Arc<dyn Locks>,
        leaderboard: Arc<LeaderboardIndex>,
        pubsub: Arc<dyn PubSub>,
        clock: Arc<dyn Clock>,
        config: Arc<AppConfig>,
        admission: Arc<dyn AdmissionGuard>,
    ) -> Self {
        let bid_engine = Arc::new(BidEngine::new(
            store.clone(),
            locks.clone(),
            leaderboard.clone(),
            pubsub.clone(),
            clock.clone(),
            config.clone(),
            admission,
        ));
        let round_closer = Arc::new(RoundCloser::new(
            store.clone(),
            locks.clone(),
            leaderboard.clone(),
            pubsub.clone(),
            config.close_lock_lease,
        ));
        let audit = Arc::new(AuditEngine::new(store.clone()));
        Self { store, locks, leaderboard, pubsub, clock, config, bid_engine, round_closer, audit }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn leaderboard(&self) -> &Arc<LeaderboardIndex> {
        &self.leaderboard
    }

    pub fn bid_engine(&self) -> &Arc<BidEngine> {
        &self.bid_engine
    }

    pub fn round_closer(&self) -> &Arc<RoundCloser> {
        &self.round_closer
    }

    pub fn locks(&self) -> &Arc<dyn Locks> {
        &self.locks
    }

    pub async fn create_user(&self, name: impl Into<String>, is_bot: bool) -> AppResult<User> {
        let user = User::new(name, is_bot, self.clock.now());
        self.store.create_user(user.clone()).await?;
        Ok(user)
    }

    /// `create_auction(owner, spec) -> Auction` (SPEC_FULL.md §6). Validates
    /// `Σ itemsCount == totalItems` and every value > 0 before ever touching
    /// `Store`.
    pub async fn create_auction(&self, owner: UserId, spec: AuctionSpec) -> AppResult<Auction> {
        spec.validate()?;
        let auction = Auction::new(owner, spec);
        self.store.create_auction(auction.clone()).await?;
        Ok(auction)
    }

    /// `start_auction(id) -> Auction` — requires `status=pending`.
    pub async fn start_auction(&self, auction_id: AuctionId) -> AppResult<Auction> {
        self.store.start_auction(auction_id, self.clock.now()).await
    }

    pub async fn place_bid(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
        amount: Amount,
    ) -> AppResult<Bid> {
        self.bid_engine.place_bid(auction_id, user_id, amount).await
    }

    /// `get_leaderboard(id, limit, offset)` (SPEC_FULL.md §6). `rank` is
    /// 1-based and `is_winning` reflects whether this position currently
    /// falls within the round's `items_count` slots.
    pub async fn get_leaderboard(
        &self,
        auction_id: AuctionId,
        limit: u32,
        offset: u32,
    ) -> AppResult<LeaderboardPage> {
        let auction = self
            .store
            .find_auction(auction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("auction {auction_id}")))?;
        let items_count = auction.current_round_state().map(|r| r.items_count).unwrap_or(0);
        let total_count = self.leaderboard.count(auction_id);

        let window = self.leaderboard.top_n(auction_id, offset.saturating_add(limit));
        let mut entries = Vec::with_capacity(window.len().saturating_sub(offset as usize));
        for e in window.into_iter().skip(offset as usize) {
            // LeaderboardIndex tracks only what ranking needs (amount, arrival
            // order); createdAt comes from the bid record itself.
            let created_at = self
                .store
                .find_bid(e.bid_id)
                .await?
                .map(|b| b.created_at)
                .unwrap_or_else(|| self.clock.now());
            entries.push(LeaderboardEntry {
                rank: e.rank,
                user_id: e.user_id,
                amount: e.amount,
                is_winning: e.rank <= items_count,
                created_at,
            });
        }

        Ok(LeaderboardPage { entries, total_count, past_winners: auction.past_winners })
    }

    /// `get_min_winning_bid(id) -> amount | null`. Returns `minBidAmount`
    /// rather than `null` when fewer than `itemsCount` active entries exist
    /// (Open Question 2 resolution — see DESIGN.md).
    pub async fn get_min_winning_bid(&self, auction_id: AuctionId) -> AppResult<Amount> {
        let auction = self
            .store
            .find_auction(auction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("auction {auction_id}")))?;
        let items_count = auction.current_round_state().map(|r| r.items_count).unwrap_or(0);
        Ok(self.leaderboard.min_winning_amount(auction_id, items_count, auction.spec.min_bid_amount))
    }

    pub async fn get_user_bids(&self, auction_id: AuctionId, user_id: UserId) -> AppResult<Vec<Bid>> {
        self.store.find_user_bids(auction_id, user_id).await
    }

    pub async fn audit_financial(&self) -> AppResult<AuditResponse> {
        self.audit.audit_financial().await
    }

    pub async fn deposit(&self, user_id: UserId, amount: Amount) -> AppResult<User> {
        let (user, _txn) = self.store.wallet_deposit(user_id, amount, self.clock.now()).await?;
        Ok(user)
    }

    pub async fn withdraw(&self, user_id: UserId, amount: Amount) -> AppResult<User> {
        let (user, _txn) = self.store.wallet_withdraw(user_id, amount, self.clock.now()).await?;
        Ok(user)
    }

    /// Convenience accessor for transports that want to subscribe a client
    /// to an auction's real-time feed.
    pub fn subscribe(&self, auction_id: AuctionId) -> tokio::sync::broadcast::Receiver<crate::domain::Event> {
        self.pubsub.subscribe(&format!("auction:{auction_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::domain::RoundConfig;
    use crate::locks::InMemoryLocks;
    use crate::pubsub::InProcessPubSub;
    use crate::store::InMemoryStore;

    fn spec() -> AuctionSpec {
        AuctionSpec {
            title: "widgets".into(),
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

    async fn service() -> (AuctionService, Arc<MockClock>) {
        let store = Arc::new(InMemoryStore::new());
        let locks = Arc::new(InMemoryLocks::new());
        let leaderboard = Arc::new(LeaderboardIndex::new());
        let pubsub = Arc::new(InProcessPubSub::new());
        let clock = Arc::new(MockClock::new(chrono::Utc::now()));
        let config = Arc::new(AppConfig::default());
        let service =
            AuctionService::new(store, locks, leaderboard, pubsub, clock.clone() as Arc<dyn Clock>, config);
        (service, clock)
    }

    #[tokio::test]
    async fn full_bid_and_leaderboard_round_trip() {
        let (service, _clock) = service().await;
        let owner = service.create_user("owner", false).await.unwrap();
        let bidder = service.create_user("bidder", false).await.unwrap();
        service.deposit(bidder.id, 10_000).await.unwrap();

        let auction = service.create_auction(owner.id, spec()).await.unwrap();
        let auction = service.start_auction(auction.id).await.unwrap();

        service.place_bid(auction.id, bidder.id, 150).await.unwrap();

        let page = service.get_leaderboard(auction.id, 10, 0).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].amount, 150);
        assert!(page.entries[0].is_winning);

        let min = service.get_min_winning_bid(auction.id).await.unwrap();
        assert_eq!(min, 150); // the one active bid is itself the nth (1st) highest amount

        let audit = service.audit_financial().await.unwrap();
        assert!(audit.is_valid);
    }

    #[tokio::test]
    async fn create_auction_rejects_mismatched_item_counts() {
        let (service, _clock) = service().await;
        let owner = service.create_user("owner", false).await.unwrap();
        let mut bad_spec = spec();
        bad_spec.total_items = 5;
        let result = service.create_auction(owner.id, bad_spec).await;
        assert!(matches!(result, Err(AppError::InvalidSpec(_))));
    }
}
