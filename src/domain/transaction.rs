//! `Transaction` journal entity (SPEC_FULL.md §3) — append-only ledger of
//! every Wallet transition, with pre/post balances for audit replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{Amount, AuctionId, BidId, TransactionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    Deposit,
    Withdraw,
    Freeze,
    Unfreeze,
    Win,
    Refund,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub kind: TransactionType,
    pub amount: Amount,
    pub balance_before: u64,
    pub balance_after: u64,
    pub frozen_before: u64,
    pub frozen_after: u64,
    pub auction_id: Option<AuctionId>,
    pub bid_id: Option<BidId>,
    pub recorded_at: DateTime<Utc>,
}
