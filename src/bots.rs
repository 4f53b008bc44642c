//! `BotSwarm` (SPEC_FULL.md §4.8): optional simulated bidders for an auction
//! that opted into `botsEnabled`. Each bot is its own task that wakes on a
//! jittered interval, checks whether it's still worth bidding, and either
//! raises the current floor by a small margin or stays quiet.
//!
//! Grounded on the teacher's `rand`-jittered retry/backoff usage and the
//! `tokio::sync::watch`-based shutdown signal used elsewhere in this crate's
//! `RoundScheduler` — bots need the same "stop cleanly" signal, not a hard
//! `abort()`.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::bid_engine::BidEngine;
use crate::core_types::{AuctionId, UserId};
use crate::error::AppError;
use crate::leaderboard::LeaderboardIndex;
use crate::store::Store;

/// One simulated bidder. `min_increment`/`max_increment` bound how far above
/// the current leading amount it's willing to jump.
pub struct Bot {
    pub user_id: UserId,
    pub min_increment: u64,
    pub max_increment: u64,
    pub max_amount: u64,
}

pub struct BotSwarm {
    engine: Arc<BidEngine>,
    store: Arc<dyn Store>,
    leaderboard: Arc<LeaderboardIndex>,
    bots: Vec<Bot>,
    tick_interval: Duration,
}

impl BotSwarm {
    pub fn new(
        engine: Arc<BidEngine>,
        store: Arc<dyn Store>,
        leaderboard: Arc<LeaderboardIndex>,
        bots: Vec<Bot>,
        tick_interval: Duration,
    ) -> Self {
        Self { engine, store, leaderboard, bots, tick_interval }
    }

    /// Runs every bot's loop concurrently against `auction_id` until
    /// `shutdown` fires or the auction completes. Each iteration jitters its
    /// own sleep so bots don't all wake on the same tick and collide on the
    /// same next-amount guess.
    pub async fn run(&self, auction_id: AuctionId, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut handles = Vec::new();
        for bot in &self.bots {
            let engine = self.engine.clone();
            let store = self.store.clone();
            let leaderboard = self.leaderboard.clone();
            let user_id = bot.user_id;
            let min_increment = bot.min_increment;
            let max_increment = bot.max_increment;
            let max_amount = bot.max_amount;
            let tick_interval = self.tick_interval;
            let mut shutdown = shutdown.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let jitter = rand::thread_rng().gen_range(0..tick_interval.as_millis().max(1) as u64);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(jitter)) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return;
                            }
                        }
                    }

                    match store.find_auction(auction_id).await {
                        Ok(Some(auction)) if auction.is_active() => {}
                        _ => return,
                    }

                    let leading = leaderboard.top_n(auction_id, 1).first().map(|e| e.amount).unwrap_or(0);
                    let raise = rand::thread_rng().gen_range(min_increment..=max_increment.max(min_increment));
                    let next_amount = leading.saturating_add(raise).max(min_increment);
                    if next_amount > max_amount {
                        debug!(%user_id, %auction_id, "bot reached its max amount, stopping");
                        return;
                    }

                    match engine.place_bid(auction_id, user_id, next_amount).await {
                        Ok(_) => {}
                        Err(AppError::AuctionNotActive(_)) => return,
                        Err(AppError::AmountTaken { .. }) => continue,
                        Err(e) => warn!(%user_id, %auction_id, error = %e, "bot bid failed"),
                    }
                }
            }));
        }
        let _ = &shutdown; // each spawned task holds its own clone
        for handle in handles {
            let _ = handle.await;
        }
    }
}
