//! Persistence boundary (SPEC_FULL.md §4.1).
//!
//! The spec describes `Store` as a generic `with_tx(fn)` combinator: run an
//! arbitrary body inside a snapshot-isolated transaction, retrying on
//! transient-conflict signals. A literal generic transaction callback isn't
//! object-safe in Rust (the body would need a generic return type on a trait
//! we also want to hold as `Arc<dyn Store>` for `InMemoryStore` swapping in
//! tests), so the atomicity boundary is pushed down into named, single-purpose
//! methods instead — the same shape the teacher's `TransferService::execute`
//! uses: one method owns its whole multi-statement transaction rather than
//! accepting a callback. See DESIGN.md for the full rationale.
//!
//! `retry::with_retry` supplies the "bounded attempts with backoff" behavior
//! the spec's `with_tx` contract requires; `PgStore`'s methods call it
//! internally around the `SERIALIZABLE` transaction body.

mod memory;
mod postgres;
pub mod retry;
pub mod schema;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core_types::{Amount, ArrivalSeq, AuctionId, BidId, UserId};
use crate::domain::{Auction, AuditLog, Bid, Transaction, User};
use crate::error::AppResult;

/// Aggregate of every wallet's avail+frozen, for the `AuditEngine`'s
/// financial-integrity invariant (SPEC_FULL.md §4.9).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceAggregate {
    pub total_avail: u128,
    pub total_frozen: u128,
}

/// Sums of the three transaction kinds that change total holdings — the
/// right-hand side of the financial-integrity invariant (SPEC_FULL.md §4.9):
/// `Σbalance + Σfrozen = Σdeposits − Σwithdrawals − Σwinnings`. `Freeze`/
/// `Unfreeze`/`Refund` move money between `avail` and `frozen` without
/// changing the total, so they don't participate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionTotals {
    pub deposits: u128,
    pub withdrawals: u128,
    pub wins: u128,
}

/// Winner assignment handed to `Store::close_round` once `RoundCloser` has
/// ranked the leaderboard — item numbers are 1-based, in rank order.
#[derive(Debug, Clone)]
pub struct RoundWinner {
    pub bid_id: BidId,
    pub user_id: UserId,
    pub amount: Amount,
    pub item_number: u32,
}

#[derive(Debug, Clone)]
pub struct CloseRoundCommand {
    pub auction_id: AuctionId,
    pub round_number: u32,
    pub winners: Vec<RoundWinner>,
    pub now: DateTime<Utc>,
}

/// Outcome of a (possibly already-applied) round closure. `already_closed`
/// lets `RoundCloser` treat a retried tick as a no-op instead of an error
/// (SPEC_FULL.md §8 scenario I, close-lock failover).
#[derive(Debug, Clone)]
pub struct CloseRoundCommitted {
    pub already_closed: bool,
    pub auction: Auction,
    pub refunded_bid_ids: Vec<BidId>,
    pub carried_bid_ids: Vec<BidId>,
}

#[derive(Debug, Clone)]
pub struct PlaceBidCommand {
    pub auction_id: AuctionId,
    pub user_id: UserId,
    pub amount: Amount,
    pub now: DateTime<Utc>,
    /// Round-end cutoff inside which a bid triggers an anti-snipe extension,
    /// and the extension length/cap to apply if it does. Resolved by
    /// `BidEngine` from the auction's spec before the call, so `Store` never
    /// has to reach back into `AuctionSpec` mid-transaction.
    pub anti_snipe_window: chrono::Duration,
    pub anti_snipe_extension: chrono::Duration,
    pub max_extensions: u32,
}

#[derive(Debug, Clone)]
pub struct ExtensionApplied {
    pub new_end_time: DateTime<Utc>,
    pub extensions_count: u32,
}

#[derive(Debug, Clone)]
pub struct PlaceBidCommitted {
    pub bid: Bid,
    /// `Some(previous_amount)` when this call raised an existing active bid
    /// rather than opening a new one.
    pub previous_amount: Option<Amount>,
    pub extension: Option<ExtensionApplied>,
}

/// Persistence + atomic business-transaction boundary.
///
/// Finder methods are snapshot reads outside any transaction; `place_bid` and
/// `close_round` are the two operations that must observe and mutate several
/// rows atomically, so they run inside a `SERIALIZABLE` transaction with
/// retry (`PgStore`) or a single mutex critical section (`InMemoryStore`).
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_user(&self, id: UserId) -> AppResult<Option<User>>;
    async fn find_auction(&self, id: AuctionId) -> AppResult<Option<Auction>>;
    async fn find_bid(&self, id: BidId) -> AppResult<Option<Bid>>;
    async fn find_active_bid_for_user(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
    ) -> AppResult<Option<Bid>>;
    async fn find_active_bids_by_auction(&self, auction_id: AuctionId) -> AppResult<Vec<Bid>>;
    /// Every bid a user has ever placed in an auction, regardless of status
    /// (`GetUserBids`, SPEC_FULL.md §6).
    async fn find_user_bids(&self, auction_id: AuctionId, user_id: UserId) -> AppResult<Vec<Bid>>;
    /// Active auctions whose current round's `end_time <= now`, polled by
    /// `RoundScheduler`.
    async fn list_due_auctions(&self, now: DateTime<Utc>) -> AppResult<Vec<AuctionId>>;
    /// Every auction currently in `Active` status, polled by the leaderboard
    /// reconciler after a restart or a detected drift.
    async fn list_active_auctions(&self) -> AppResult<Vec<AuctionId>>;
    async fn aggregate_balances(&self) -> AppResult<BalanceAggregate>;
    async fn aggregate_transactions(&self) -> AppResult<TransactionTotals>;

    async fn create_user(&self, user: User) -> AppResult<()>;
    async fn create_auction(&self, auction: Auction) -> AppResult<()>;
    async fn start_auction(&self, auction_id: AuctionId, now: DateTime<Utc>) -> AppResult<Auction>;

    async fn wallet_deposit(
        &self,
        user_id: UserId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> AppResult<(User, Transaction)>;
    async fn wallet_withdraw(
        &self,
        user_id: UserId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> AppResult<(User, Transaction)>;

    /// Bid placement (SPEC_FULL.md §4.5 step 4): re-validates balance and the
    /// unique-active-amount invariant inside the transaction, assigns the
    /// next `arrival_seq`, freezes/adjusts the wallet hold, and applies an
    /// anti-snipe extension if the bid lands inside the window — all or
    /// nothing.
    async fn place_bid(&self, cmd: PlaceBidCommand) -> AppResult<PlaceBidCommitted>;

    /// Round closure (SPEC_FULL.md §4.6 steps 4-9): settles winners, carries
    /// or refunds losers, advances `current_round` or completes the auction.
    /// Idempotent — a second call with the same `round_number` after it has
    /// already closed returns `already_closed: true` instead of re-settling.
    async fn close_round(&self, cmd: CloseRoundCommand) -> AppResult<CloseRoundCommitted>;

    /// Next per-auction arrival sequence, exposed for components (e.g. bots)
    /// that need to reason about ordering without placing a bid.
    async fn peek_arrival_seq(&self, auction_id: AuctionId) -> AppResult<ArrivalSeq>;

    /// Appends one entry to the audit journal (SPEC_FULL.md §4.9). Best-effort
    /// relative to the business transaction it describes: a write that
    /// already committed is true regardless of whether its audit entry lands,
    /// so this is a separate call rather than folded into `place_bid`/
    /// `close_round`.
    async fn append_audit_log(&self, log: AuditLog) -> AppResult<()>;
    async fn list_audit_logs(&self, auction_id: Option<AuctionId>) -> AppResult<Vec<AuditLog>>;
}
