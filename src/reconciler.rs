//! `LeaderboardReconciler`: rebuilds `LeaderboardIndex` from `Store` state.
//!
//! The leaderboard is an in-process cache — truth is `Store` (SPEC_FULL.md
//! §5, shared-resource policy). A fresh worker process starts with an empty
//! `LeaderboardIndex`, and a worker that suspects drift (e.g. after a publish
//! failure) needs a way back to a known-good state without restarting.
//! Grounded on the teacher's `config_watcher.rs` poll-and-refresh loop, here
//! driving `LeaderboardIndex::rebuild` instead of a config cache.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, instrument};

use crate::core_types::AuctionId;
use crate::leaderboard::LeaderboardIndex;
use crate::store::Store;

pub struct LeaderboardReconciler {
    store: Arc<dyn Store>,
    leaderboard: Arc<LeaderboardIndex>,
}

impl LeaderboardReconciler {
    pub fn new(store: Arc<dyn Store>, leaderboard: Arc<LeaderboardIndex>) -> Self {
        Self { store, leaderboard }
    }

    /// Rebuilds every active auction's board from its active bids. Called
    /// once at startup before any other component reads the leaderboard, and
    /// safe to call again at any time — `rebuild` replaces a board wholesale.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> crate::error::AppResult<()> {
        let auction_ids = self.store.list_active_auctions().await?;
        for auction_id in auction_ids {
            if let Err(e) = self.reconcile_one(auction_id).await {
                error!(%auction_id, error = %e, "failed to reconcile leaderboard");
            }
        }
        Ok(())
    }

    pub async fn reconcile_one(&self, auction_id: AuctionId) -> crate::error::AppResult<()> {
        let bids = self.store.find_active_bids_by_auction(auction_id).await?;
        debug!(%auction_id, count = bids.len(), "rebuilding leaderboard");
        self.leaderboard.rebuild(
            auction_id,
            bids.into_iter().map(|b| (b.id, b.user_id, b.amount, b.arrival_seq)),
        );
        Ok(())
    }

    /// Runs `reconcile_all` on a fixed interval until `shutdown` fires —
    /// a periodic safety net against any drift a single reconcile at startup
    /// wouldn't catch (e.g. a bug in incremental `upsert` call sites).
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_all().await {
                        error!(error = %e, "periodic leaderboard reconciliation failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};
    use crate::domain::{Auction, AuctionSpec, RoundConfig, User};
    use crate::store::{InMemoryStore, PlaceBidCommand};

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
    async fn rebuilds_board_from_active_bids() {
        let store = Arc::new(InMemoryStore::new());
        let leaderboard = Arc::new(LeaderboardIndex::new());
        let clock = MockClock::new(chrono::Utc::now());

        let owner = User::new("owner", false, clock.now());
        store.create_user(owner.clone()).await.unwrap();
        let bidder = User::new("bidder", false, clock.now());
        store.create_user(bidder.clone()).await.unwrap();
        store.wallet_deposit(bidder.id, 10_000, clock.now()).await.unwrap();

        let mut auction = Auction::new(owner.id, spec());
        auction.start(clock.now()).unwrap();
        let auction_id = auction.id;
        store.create_auction(auction).await.unwrap();

        store
            .place_bid(PlaceBidCommand {
                auction_id,
                user_id: bidder.id,
                amount: 150,
                now: clock.now(),
                anti_snipe_window: chrono::Duration::zero(),
                anti_snipe_extension: chrono::Duration::zero(),
                max_extensions: 0,
            })
            .await
            .unwrap();

        assert_eq!(leaderboard.count(auction_id), 0);
        let reconciler = LeaderboardReconciler::new(store, leaderboard.clone());
        reconciler.reconcile_one(auction_id).await.unwrap();
        assert_eq!(leaderboard.count(auction_id), 1);
    }
}
