//! `Bid` entity (SPEC_FULL.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{Amount, ArrivalSeq, AuctionId, BidId, RoundNumber, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BidStatus {
    Active,
    Won,
    Lost,
    Refunded,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub auction_id: AuctionId,
    pub user_id: UserId,
    pub amount: Amount,
    pub status: BidStatus,
    pub won_round: Option<RoundNumber>,
    pub item_number: Option<u32>,
    pub carried_from_round: Option<RoundNumber>,
    pub created_at: DateTime<Utc>,
    /// Monotonic per-auction sequence assigned at commit time; the
    /// leaderboard tie-breaker (SPEC_FULL.md §3, Open Question 3).
    pub arrival_seq: ArrivalSeq,
    pub version: u64,
}

impl Bid {
    pub fn new_active(
        auction_id: AuctionId,
        user_id: UserId,
        amount: Amount,
        arrival_seq: ArrivalSeq,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BidId::new(),
            auction_id,
            user_id,
            amount,
            status: BidStatus::Active,
            won_round: None,
            item_number: None,
            carried_from_round: None,
            created_at: now,
            arrival_seq,
            version: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BidStatus::Active
    }
}
