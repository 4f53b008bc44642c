//! `AuditEngine` (SPEC_FULL.md §4.9): the global financial-integrity check.
//!
//! `Store::aggregate_balances`/`aggregate_transactions` each run their own
//! `SERIALIZABLE` read, same as the teacher's `reconcile.rs` balance sweep —
//! not a single cross-table snapshot, since `Store` exposes named operations
//! rather than an arbitrary-read transaction (see `store/mod.rs`). The spec
//! allows a result that is consistent but not necessarily the very latest
//! write, which this satisfies: each aggregate is itself a consistent
//! snapshot, just not guaranteed to be the same instant as the other.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::AppResult;
use crate::store::Store;

/// `audit_financial()`'s response (SPEC_FULL.md §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditResponse {
    pub is_valid: bool,
    pub total_balance: u128,
    pub total_frozen: u128,
    pub total_winnings: u128,
    /// `(total_balance + total_frozen) - (deposits - withdrawals - winnings)`,
    /// signed as a string since the discrepancy can be negative and `u128`
    /// has no native signed counterpart worth importing a crate for.
    pub discrepancy: i128,
    pub details: String,
}

pub struct AuditEngine {
    store: Arc<dyn Store>,
}

impl AuditEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Checks `Σbalance + Σfrozen == Σdeposits − Σwithdrawals − Σwinnings`
    /// (SPEC_FULL.md §4.9). `Freeze`/`Unfreeze`/`Refund` transactions move
    /// money between `avail` and `frozen` without changing either side's
    /// total, so they're excluded from the right-hand side.
    pub async fn audit_financial(&self) -> AppResult<AuditResponse> {
        let balances = self.store.aggregate_balances().await?;
        let totals = self.store.aggregate_transactions().await?;

        let left = balances.total_avail as i128 + balances.total_frozen as i128;
        let right =
            totals.deposits as i128 - totals.withdrawals as i128 - totals.wins as i128;
        let discrepancy = left - right;
        let is_valid = discrepancy == 0;

        let details = if is_valid {
            "balances reconcile with the transaction ledger".to_string()
        } else {
            format!(
                "balance+frozen={left} but deposits-withdrawals-winnings={right}, off by {discrepancy}"
            )
        };

        if is_valid {
            info!(left, right, "financial-integrity audit passed");
        } else {
            warn!(left, right, discrepancy, "financial-integrity audit FAILED");
        }

        Ok(AuditResponse {
            is_valid,
            total_balance: balances.total_avail,
            total_frozen: balances.total_frozen,
            total_winnings: totals.wins,
            discrepancy,
            details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};
    use crate::domain::{Auction, AuctionSpec, RoundConfig, User};
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
    async fn fresh_store_is_balanced() {
        let store = Arc::new(InMemoryStore::new());
        let engine = AuditEngine::new(store);
        let audit = engine.audit_financial().await.unwrap();
        assert!(audit.is_valid);
        assert_eq!(audit.discrepancy, 0);
    }

    #[tokio::test]
    async fn deposits_and_a_settled_win_stay_balanced() {
        let store = Arc::new(InMemoryStore::new());
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

        let committed = store
            .place_bid(crate::store::PlaceBidCommand {
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

        store
            .close_round(crate::store::CloseRoundCommand {
                auction_id,
                round_number: 1,
                winners: vec![crate::store::RoundWinner {
                    bid_id: committed.bid.id,
                    user_id: bidder.id,
                    amount: 150,
                    item_number: 1,
                }],
                now: clock.now(),
            })
            .await
            .unwrap();

        let engine = AuditEngine::new(store);
        let audit = engine.audit_financial().await.unwrap();
        assert!(audit.is_valid, "{}", audit.details);
        assert_eq!(audit.total_winnings, 150);
    }
}
