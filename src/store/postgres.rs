//! Postgres-backed `Store` (SPEC_FULL.md §4.1).
//!
//! Grounded on the teacher's `account/db.rs` (`PgPoolOptions` setup) and
//! `funding/service.rs` (`pool.begin()` → `SELECT ... FOR UPDATE` → update →
//! insert → `commit()`). Queries use `sqlx::query_as`/`sqlx::query` at
//! runtime rather than the teacher's `query_as!` compile-time macro: the
//! macro needs a live database or a checked-in `.sqlx` cache at build time,
//! which this crate cannot assume (see DESIGN.md).
//!
//! Nested JSON columns go through `sqlx::types::Json<T>`, the same wrapper
//! the `sqlx` ecosystem uses whenever a column's shape is a Rust struct
//! rather than a SQL scalar.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core_types::{Amount, ArrivalSeq, AuctionId, BidId, TransactionId, UserId};
use crate::domain::auction::{AuctionStatus, RoundState};
use crate::domain::bid::BidStatus;
use crate::domain::{Auction, AuctionSpec, AuditLog, Bid, Transaction, TransactionType, User};
use crate::error::{AppError, AppResult};

use super::retry::with_retry;
use super::{
    BalanceAggregate, CloseRoundCommand, CloseRoundCommitted, PlaceBidCommand, PlaceBidCommitted,
    Store, TransactionTotals,
};

pub struct PgStore {
    pool: PgPool,
    max_retries_tx: u32,
}

impl PgStore {
    pub async fn connect(config: &AppConfig) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pg_pool_size)
            .acquire_timeout(config.pg_acquire_timeout)
            .connect(&config.database_url)
            .await?;
        Ok(Self { pool, max_retries_tx: config.max_retries_tx })
    }

    /// For tests/tools that already hold a pool (e.g. sharing one across a
    /// `PgStore` and a `PgLocks`).
    pub fn from_pool(pool: PgPool, max_retries_tx: u32) -> Self {
        Self { pool, max_retries_tx }
    }

    /// Exposed for the composition root to run `schema::CREATE_TABLES` and
    /// for sharing one pool with `PgLocks`.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin_serializable(&self) -> AppResult<sqlx::Transaction<'_, sqlx::Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

fn auction_status_str(s: AuctionStatus) -> &'static str {
    match s {
        AuctionStatus::Pending => "Pending",
        AuctionStatus::Active => "Active",
        AuctionStatus::Completed => "Completed",
    }
}

fn auction_status_from_str(s: &str) -> AppResult<AuctionStatus> {
    match s {
        "Pending" => Ok(AuctionStatus::Pending),
        "Active" => Ok(AuctionStatus::Active),
        "Completed" => Ok(AuctionStatus::Completed),
        other => Err(AppError::Internal(format!("unknown auction status in store: {other}"))),
    }
}

fn bid_status_str(s: BidStatus) -> &'static str {
    match s {
        BidStatus::Active => "Active",
        BidStatus::Won => "Won",
        BidStatus::Lost => "Lost",
        BidStatus::Refunded => "Refunded",
        BidStatus::Cancelled => "Cancelled",
    }
}

fn bid_status_from_str(s: &str) -> AppResult<BidStatus> {
    match s {
        "Active" => Ok(BidStatus::Active),
        "Won" => Ok(BidStatus::Won),
        "Lost" => Ok(BidStatus::Lost),
        "Refunded" => Ok(BidStatus::Refunded),
        "Cancelled" => Ok(BidStatus::Cancelled),
        other => Err(AppError::Internal(format!("unknown bid status in store: {other}"))),
    }
}

fn row_to_user(
    id: Uuid,
    name: String,
    is_bot: bool,
    avail: i64,
    frozen: i64,
    version: i64,
    created_at: DateTime<Utc>,
) -> User {
    User {
        id: UserId::from_uuid(id),
        name,
        balance: crate::domain::Balance::new(avail as u64, frozen as u64, version as u64),
        is_bot,
        created_at,
    }
}

fn row_to_auction(
    id: Uuid,
    owner: Uuid,
    spec: Json<AuctionSpec>,
    status: String,
    current_round: i32,
    rounds: Json<Vec<RoundState>>,
    past_winners: Json<Vec<(UserId, Amount, u32)>>,
    version: i64,
) -> AppResult<Auction> {
    Ok(Auction {
        id: AuctionId::from_uuid(id),
        owner: UserId::from_uuid(owner),
        spec: spec.0,
        status: auction_status_from_str(&status)?,
        current_round: current_round as u32,
        rounds: rounds.0,
        past_winners: past_winners.0,
        version: version as u64,
    })
}

fn row_to_bid(
    id: Uuid,
    auction_id: Uuid,
    user_id: Uuid,
    amount: i64,
    status: String,
    won_round: Option<i32>,
    item_number: Option<i32>,
    carried_from_round: Option<i32>,
    created_at: DateTime<Utc>,
    arrival_seq: i64,
    version: i64,
) -> AppResult<Bid> {
    Ok(Bid {
        id: BidId::from_uuid(id),
        auction_id: AuctionId::from_uuid(auction_id),
        user_id: UserId::from_uuid(user_id),
        amount: amount as u64,
        status: bid_status_from_str(&status)?,
        won_round: won_round.map(|r| r as u32),
        item_number: item_number.map(|n| n as u32),
        carried_from_round: carried_from_round.map(|r| r as u32),
        created_at,
        arrival_seq: arrival_seq as u64,
        version: version as u64,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn find_user(&self, id: UserId) -> AppResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, name, is_bot, avail, frozen, version, created_at FROM users WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            None => None,
            Some(r) => Some(row_to_user(
                r.try_get("id")?,
                r.try_get("name")?,
                r.try_get("is_bot")?,
                r.try_get("avail")?,
                r.try_get("frozen")?,
                r.try_get("version")?,
                r.try_get("created_at")?,
            )),
        })
    }

    async fn find_auction(&self, id: AuctionId) -> AppResult<Option<Auction>> {
        let row = sqlx::query(
            "SELECT id, owner, spec, status, current_round, rounds, past_winners, version \
             FROM auctions WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            row_to_auction(
                r.try_get("id")?,
                r.try_get("owner")?,
                r.try_get::<Json<AuctionSpec>, _>("spec")?,
                r.try_get("status")?,
                r.try_get("current_round")?,
                r.try_get::<Json<Vec<RoundState>>, _>("rounds")?,
                r.try_get::<Json<Vec<(UserId, Amount, u32)>>, _>("past_winners")?,
                r.try_get("version")?,
            )
        })
        .transpose()
    }

    async fn find_bid(&self, id: BidId) -> AppResult<Option<Bid>> {
        let row = sqlx::query(
            "SELECT id, auction_id, user_id, amount, status, won_round, item_number, \
             carried_from_round, created_at, arrival_seq, version FROM bids WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            row_to_bid(
                r.try_get("id")?,
                r.try_get("auction_id")?,
                r.try_get("user_id")?,
                r.try_get("amount")?,
                r.try_get("status")?,
                r.try_get("won_round")?,
                r.try_get("item_number")?,
                r.try_get("carried_from_round")?,
                r.try_get("created_at")?,
                r.try_get("arrival_seq")?,
                r.try_get("version")?,
            )
        })
        .transpose()
    }

    async fn find_active_bid_for_user(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
    ) -> AppResult<Option<Bid>> {
        let row = sqlx::query(
            "SELECT id, auction_id, user_id, amount, status, won_round, item_number, \
             carried_from_round, created_at, arrival_seq, version FROM bids \
             WHERE auction_id = $1 AND user_id = $2 AND status = 'Active'",
        )
        .bind(auction_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            row_to_bid(
                r.try_get("id")?,
                r.try_get("auction_id")?,
                r.try_get("user_id")?,
                r.try_get("amount")?,
                r.try_get("status")?,
                r.try_get("won_round")?,
                r.try_get("item_number")?,
                r.try_get("carried_from_round")?,
                r.try_get("created_at")?,
                r.try_get("arrival_seq")?,
                r.try_get("version")?,
            )
        })
        .transpose()
    }

    async fn find_active_bids_by_auction(&self, auction_id: AuctionId) -> AppResult<Vec<Bid>> {
        let rows = sqlx::query(
            "SELECT id, auction_id, user_id, amount, status, won_round, item_number, \
             carried_from_round, created_at, arrival_seq, version FROM bids \
             WHERE auction_id = $1 AND status = 'Active'",
        )
        .bind(auction_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| {
                row_to_bid(
                    r.try_get("id")?,
                    r.try_get("auction_id")?,
                    r.try_get("user_id")?,
                    r.try_get("amount")?,
                    r.try_get("status")?,
                    r.try_get("won_round")?,
                    r.try_get("item_number")?,
                    r.try_get("carried_from_round")?,
                    r.try_get("created_at")?,
                    r.try_get("arrival_seq")?,
                    r.try_get("version")?,
                )
            })
            .collect()
    }

    async fn find_user_bids(&self, auction_id: AuctionId, user_id: UserId) -> AppResult<Vec<Bid>> {
        let rows = sqlx::query(
            "SELECT id, auction_id, user_id, amount, status, won_round, item_number, \
             carried_from_round, created_at, arrival_seq, version FROM bids \
             WHERE auction_id = $1 AND user_id = $2 ORDER BY created_at",
        )
        .bind(auction_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| {
                row_to_bid(
                    r.try_get("id")?,
                    r.try_get("auction_id")?,
                    r.try_get("user_id")?,
                    r.try_get("amount")?,
                    r.try_get("status")?,
                    r.try_get("won_round")?,
                    r.try_get("item_number")?,
                    r.try_get("carried_from_round")?,
                    r.try_get("created_at")?,
                    r.try_get("arrival_seq")?,
                    r.try_get("version")?,
                )
            })
            .collect()
    }

    async fn list_due_auctions(&self, now: DateTime<Utc>) -> AppResult<Vec<AuctionId>> {
        // `rounds -> (current_round - 1) ->> 'end_time'` reaches into the
        // JSONB round list for the currently active round's end time.
        let rows = sqlx::query(
            "SELECT id FROM auctions \
             WHERE status = 'Active' \
               AND (rounds -> (current_round - 1) ->> 'completed')::boolean = false \
               AND (rounds -> (current_round - 1) ->> 'end_time')::timestamptz <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| Ok(AuctionId::from_uuid(r.try_get("id")?)))
            .collect()
    }

    async fn list_active_auctions(&self) -> AppResult<Vec<AuctionId>> {
        let rows = sqlx::query("SELECT id FROM auctions WHERE status = 'Active'")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| Ok(AuctionId::from_uuid(r.try_get("id")?)))
            .collect()
    }

    async fn aggregate_balances(&self) -> AppResult<BalanceAggregate> {
        // SUM(bigint) over a handful of per-user columns never approaches
        // i64::MAX for this domain, so a plain bigint sum (rather than
        // pulling in a decimal crate just for this one query) is sufficient.
        let row = sqlx::query(
            "SELECT COALESCE(SUM(avail), 0) AS total_avail, \
                    COALESCE(SUM(frozen), 0) AS total_frozen FROM users",
        )
        .fetch_one(&self.pool)
        .await?;
        let total_avail: i64 = row.try_get("total_avail")?;
        let total_frozen: i64 = row.try_get("total_frozen")?;
        Ok(BalanceAggregate {
            total_avail: total_avail as u128,
            total_frozen: total_frozen as u128,
        })
    }

    async fn aggregate_transactions(&self) -> AppResult<TransactionTotals> {
        let rows = sqlx::query(
            "SELECT kind, COALESCE(SUM(amount), 0) AS total FROM transactions \
             WHERE kind IN ('Deposit', 'Withdraw', 'Win') GROUP BY kind",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut totals = TransactionTotals::default();
        for row in rows {
            let kind: String = row.try_get("kind")?;
            let total: i64 = row.try_get("total")?;
            match kind.as_str() {
                "Deposit" => totals.deposits = total as u128,
                "Withdraw" => totals.withdrawals = total as u128,
                "Win" => totals.wins = total as u128,
                _ => {}
            }
        }
        Ok(totals)
    }

    async fn create_user(&self, user: User) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO users (id, name, is_bot, avail, frozen, version, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(user.id.as_uuid())
        .bind(&user.name)
        .bind(user.is_bot)
        .bind(user.balance.avail() as i64)
        .bind(user.balance.frozen() as i64)
        .bind(user.balance.version() as i64)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_auction(&self, auction: Auction) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO auctions (id, owner, spec, status, current_round, rounds, past_winners, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(auction.id.as_uuid())
        .bind(auction.owner.as_uuid())
        .bind(Json(&auction.spec))
        .bind(auction_status_str(auction.status))
        .bind(auction.current_round as i32)
        .bind(Json(&auction.rounds))
        .bind(Json(&auction.past_winners))
        .bind(auction.version as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn start_auction(&self, auction_id: AuctionId, now: DateTime<Utc>) -> AppResult<Auction> {
        with_retry(self.max_retries_tx, || async {
            let mut tx = self.begin_serializable().await?;
            let row = sqlx::query(
                "SELECT id, owner, spec, status, current_round, rounds, past_winners, version \
                 FROM auctions WHERE id = $1 FOR UPDATE",
            )
            .bind(auction_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("auction {auction_id}")))?;
            let mut auction = row_to_auction(
                row.try_get("id")?,
                row.try_get("owner")?,
                row.try_get::<Json<AuctionSpec>, _>("spec")?,
                row.try_get("status")?,
                row.try_get("current_round")?,
                row.try_get::<Json<Vec<RoundState>>, _>("rounds")?,
                row.try_get::<Json<Vec<(UserId, Amount, u32)>>, _>("past_winners")?,
                row.try_get("version")?,
            )?;
            auction.start(now)?;
            sqlx::query(
                "UPDATE auctions SET status = $2, current_round = $3, rounds = $4, version = $5 \
                 WHERE id = $1",
            )
            .bind(auction.id.as_uuid())
            .bind(auction_status_str(auction.status))
            .bind(auction.current_round as i32)
            .bind(Json(&auction.rounds))
            .bind(auction.version as i64)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(auction)
        })
        .await
    }

    async fn wallet_deposit(
        &self,
        user_id: UserId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> AppResult<(User, Transaction)> {
        with_retry(self.max_retries_tx, || async {
            let mut tx = self.begin_serializable().await?;
            let row = sqlx::query(
                "SELECT id, name, is_bot, avail, frozen, version, created_at FROM users \
                 WHERE id = $1 FOR UPDATE",
            )
            .bind(user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;
            let mut user = row_to_user(
                row.try_get("id")?,
                row.try_get("name")?,
                row.try_get("is_bot")?,
                row.try_get("avail")?,
                row.try_get("frozen")?,
                row.try_get("version")?,
                row.try_get("created_at")?,
            );
            let balance_before = user.balance.avail();
            let frozen_before = user.balance.frozen();
            user.balance
                .deposit(amount)
                .map_err(|e| AppError::Internal(e.to_string()))?;
            sqlx::query("UPDATE users SET avail = $2, version = $3 WHERE id = $1")
                .bind(user.id.as_uuid())
                .bind(user.balance.avail() as i64)
                .bind(user.balance.version() as i64)
                .execute(&mut *tx)
                .await?;
            let txn = Transaction {
                id: TransactionId::new(),
                user_id,
                kind: TransactionType::Deposit,
                amount,
                balance_before,
                balance_after: user.balance.avail(),
                frozen_before,
                frozen_after: user.balance.frozen(),
                auction_id: None,
                bid_id: None,
                recorded_at: now,
            };
            insert_transaction(&mut tx, &txn).await?;
            tx.commit().await?;
            Ok((user, txn))
        })
        .await
    }

    async fn wallet_withdraw(
        &self,
        user_id: UserId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> AppResult<(User, Transaction)> {
        with_retry(self.max_retries_tx, || async {
            let mut tx = self.begin_serializable().await?;
            let row = sqlx::query(
                "SELECT id, name, is_bot, avail, frozen, version, created_at FROM users \
                 WHERE id = $1 FOR UPDATE",
            )
            .bind(user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;
            let mut user = row_to_user(
                row.try_get("id")?,
                row.try_get("name")?,
                row.try_get("is_bot")?,
                row.try_get("avail")?,
                row.try_get("frozen")?,
                row.try_get("version")?,
                row.try_get("created_at")?,
            );
            let balance_before = user.balance.avail();
            let frozen_before = user.balance.frozen();
            user.balance.withdraw(amount).map_err(|_| AppError::InsufficientBalance {
                user_id,
                needed: amount,
                available: balance_before,
            })?;
            sqlx::query("UPDATE users SET avail = $2, version = $3 WHERE id = $1")
                .bind(user.id.as_uuid())
                .bind(user.balance.avail() as i64)
                .bind(user.balance.version() as i64)
                .execute(&mut *tx)
                .await?;
            let txn = Transaction {
                id: TransactionId::new(),
                user_id,
                kind: TransactionType::Withdraw,
                amount,
                balance_before,
                balance_after: user.balance.avail(),
                frozen_before,
                frozen_after: user.balance.frozen(),
                auction_id: None,
                bid_id: None,
                recorded_at: now,
            };
            insert_transaction(&mut tx, &txn).await?;
            tx.commit().await?;
            Ok((user, txn))
        })
        .await
    }

    async fn place_bid(&self, cmd: PlaceBidCommand) -> AppResult<PlaceBidCommitted> {
        with_retry(self.max_retries_tx, || async { self.place_bid_once(&cmd).await }).await
    }

    async fn close_round(&self, cmd: CloseRoundCommand) -> AppResult<CloseRoundCommitted> {
        with_retry(self.max_retries_tx, || async { self.close_round_once(&cmd).await }).await
    }

    async fn peek_arrival_seq(&self, auction_id: AuctionId) -> AppResult<ArrivalSeq> {
        let row = sqlx::query("SELECT arrival_seq FROM auctions WHERE id = $1")
            .bind(auction_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("auction {auction_id}")))?;
        let seq: i64 = row.try_get("arrival_seq")?;
        Ok(seq as u64 + 1)
    }

    async fn append_audit_log(&self, log: AuditLog) -> AppResult<()> {
        sqlx::query("INSERT INTO audit_log (id, auction_id, event, recorded_at) VALUES ($1, $2, $3, $4)")
            .bind(log.id.as_uuid())
            .bind(log.event.auction_id().map(|id| id.as_uuid()))
            .bind(Json(&log.event))
            .bind(log.recorded_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_audit_logs(&self, auction_id: Option<AuctionId>) -> AppResult<Vec<AuditLog>> {
        let rows = match auction_id {
            Some(id) => {
                sqlx::query("SELECT id, event, recorded_at FROM audit_log WHERE auction_id = $1 ORDER BY recorded_at")
                    .bind(id.as_uuid())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT id, event, recorded_at FROM audit_log ORDER BY recorded_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter()
            .map(|r| {
                Ok(AuditLog {
                    id: crate::core_types::AuditLogId::from_uuid(r.try_get("id")?),
                    event: r.try_get::<Json<crate::domain::AuditEvent>, _>("event")?.0,
                    recorded_at: r.try_get("recorded_at")?,
                })
            })
            .collect()
    }
}

async fn insert_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    txn: &Transaction,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO transactions (id, user_id, kind, amount, balance_before, balance_after, \
         frozen_before, frozen_after, auction_id, bid_id, recorded_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(txn.id.as_uuid())
    .bind(txn.user_id.as_uuid())
    .bind(format!("{:?}", txn.kind))
    .bind(txn.amount as i64)
    .bind(txn.balance_before as i64)
    .bind(txn.balance_after as i64)
    .bind(txn.frozen_before as i64)
    .bind(txn.frozen_after as i64)
    .bind(txn.auction_id.map(|id| id.as_uuid()))
    .bind(txn.bid_id.map(|id| id.as_uuid()))
    .bind(txn.recorded_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

impl PgStore {
    async fn place_bid_once(&self, cmd: &PlaceBidCommand) -> AppResult<PlaceBidCommitted> {
        let mut tx = self.begin_serializable().await?;

        let auction_row = sqlx::query(
            "SELECT id, owner, spec, status, current_round, rounds, past_winners, arrival_seq, version \
             FROM auctions WHERE id = $1 FOR UPDATE",
        )
        .bind(cmd.auction_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("auction {}", cmd.auction_id)))?;

        let mut auction = row_to_auction(
            auction_row.try_get("id")?,
            auction_row.try_get("owner")?,
            auction_row.try_get::<Json<AuctionSpec>, _>("spec")?,
            auction_row.try_get("status")?,
            auction_row.try_get("current_round")?,
            auction_row.try_get::<Json<Vec<RoundState>>, _>("rounds")?,
            auction_row.try_get::<Json<Vec<(UserId, Amount, u32)>>, _>("past_winners")?,
            auction_row.try_get("version")?,
        )?;
        let arrival_seq_counter: i64 = auction_row.try_get("arrival_seq")?;

        if !auction.is_active() {
            return Err(AppError::AuctionNotActive(cmd.auction_id));
        }

        let taken = sqlx::query(
            "SELECT 1 FROM bids WHERE auction_id = $1 AND amount = $2 AND status = 'Active' AND user_id <> $3",
        )
        .bind(cmd.auction_id.as_uuid())
        .bind(cmd.amount as i64)
        .bind(cmd.user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        if taken.is_some() {
            return Err(AppError::AmountTaken { auction_id: cmd.auction_id });
        }

        let existing_row = sqlx::query(
            "SELECT id, auction_id, user_id, amount, status, won_round, item_number, \
             carried_from_round, created_at, arrival_seq, version FROM bids \
             WHERE auction_id = $1 AND user_id = $2 AND status = 'Active' FOR UPDATE",
        )
        .bind(cmd.auction_id.as_uuid())
        .bind(cmd.user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        let existing = existing_row
            .map(|r| {
                row_to_bid(
                    r.try_get("id")?,
                    r.try_get("auction_id")?,
                    r.try_get("user_id")?,
                    r.try_get("amount")?,
                    r.try_get("status")?,
                    r.try_get("won_round")?,
                    r.try_get("item_number")?,
                    r.try_get("carried_from_round")?,
                    r.try_get("created_at")?,
                    r.try_get("arrival_seq")?,
                    r.try_get("version")?,
                )
            })
            .transpose()?;

        let (delta, previous_amount): (i64, Option<Amount>) = match &existing {
            Some(b) => {
                let min_needed = b
                    .amount
                    .checked_add(auction.spec.min_bid_increment)
                    .ok_or_else(|| AppError::Internal("bid increment overflow".into()))?;
                if cmd.amount < min_needed {
                    return Err(AppError::IncrementTooSmall {
                        auction_id: cmd.auction_id,
                        min_increment: auction.spec.min_bid_increment,
                    });
                }
                (cmd.amount as i64 - b.amount as i64, Some(b.amount))
            }
            None => {
                if cmd.amount < auction.spec.min_bid_amount {
                    return Err(AppError::BidTooLow {
                        auction_id: cmd.auction_id,
                        amount: cmd.amount,
                        min: auction.spec.min_bid_amount,
                    });
                }
                (cmd.amount as i64, None)
            }
        };

        let user_row = sqlx::query(
            "SELECT id, name, is_bot, avail, frozen, version, created_at FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(cmd.user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {}", cmd.user_id)))?;
        let mut user = row_to_user(
            user_row.try_get("id")?,
            user_row.try_get("name")?,
            user_row.try_get("is_bot")?,
            user_row.try_get("avail")?,
            user_row.try_get("frozen")?,
            user_row.try_get("version")?,
            user_row.try_get("created_at")?,
        );

        if delta > 0 && (delta as u64) > user.balance.avail() {
            return Err(AppError::InsufficientBalance {
                user_id: cmd.user_id,
                needed: delta as u64,
                available: user.balance.avail(),
            });
        }
        user.balance
            .adjust_freeze(delta)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        sqlx::query("UPDATE users SET avail = $2, frozen = $3, version = $4 WHERE id = $1")
            .bind(user.id.as_uuid())
            .bind(user.balance.avail() as i64)
            .bind(user.balance.frozen() as i64)
            .bind(user.balance.version() as i64)
            .execute(&mut *tx)
            .await?;

        let next_seq = arrival_seq_counter + 1;
        sqlx::query("UPDATE auctions SET arrival_seq = $2 WHERE id = $1")
            .bind(auction.id.as_uuid())
            .bind(next_seq)
            .execute(&mut *tx)
            .await?;

        let bid = match existing {
            Some(mut b) => {
                b.amount = cmd.amount;
                b.arrival_seq = next_seq as u64;
                b.version = b.version.wrapping_add(1);
                sqlx::query(
                    "UPDATE bids SET amount = $2, arrival_seq = $3, version = $4 WHERE id = $1",
                )
                .bind(b.id.as_uuid())
                .bind(b.amount as i64)
                .bind(b.arrival_seq as i64)
                .bind(b.version as i64)
                .execute(&mut *tx)
                .await?;
                b
            }
            None => {
                let b = Bid::new_active(cmd.auction_id, cmd.user_id, cmd.amount, next_seq as u64, cmd.now);
                sqlx::query(
                    "INSERT INTO bids (id, auction_id, user_id, amount, status, created_at, arrival_seq, version) \
                     VALUES ($1, $2, $3, $4, 'Active', $5, $6, $7)",
                )
                .bind(b.id.as_uuid())
                .bind(b.auction_id.as_uuid())
                .bind(b.user_id.as_uuid())
                .bind(b.amount as i64)
                .bind(b.created_at)
                .bind(b.arrival_seq as i64)
                .bind(b.version as i64)
                .execute(&mut *tx)
                .await?;
                b
            }
        };

        let extension = {
            let round = auction
                .current_round_state_mut()
                .expect("active auction has a current round");
            if round.end_time - cmd.now <= cmd.anti_snipe_window
                && round.extensions_count < cmd.max_extensions
            {
                round.end_time += cmd.anti_snipe_extension;
                round.extensions_count += 1;
                auction.version = auction.version.wrapping_add(1);
                Some(super::ExtensionApplied {
                    new_end_time: round.end_time,
                    extensions_count: round.extensions_count,
                })
            } else {
                None
            }
        };
        if extension.is_some() {
            sqlx::query("UPDATE auctions SET rounds = $2, version = $3 WHERE id = $1")
                .bind(auction.id.as_uuid())
                .bind(Json(&auction.rounds))
                .bind(auction.version as i64)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(PlaceBidCommitted { bid, previous_amount, extension })
    }

    async fn close_round_once(&self, cmd: &CloseRoundCommand) -> AppResult<CloseRoundCommitted> {
        let mut tx = self.begin_serializable().await?;

        let row = sqlx::query(
            "SELECT id, owner, spec, status, current_round, rounds, past_winners, version \
             FROM auctions WHERE id = $1 FOR UPDATE",
        )
        .bind(cmd.auction_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("auction {}", cmd.auction_id)))?;
        let mut auction = row_to_auction(
            row.try_get("id")?,
            row.try_get("owner")?,
            row.try_get::<Json<AuctionSpec>, _>("spec")?,
            row.try_get("status")?,
            row.try_get("current_round")?,
            row.try_get::<Json<Vec<RoundState>>, _>("rounds")?,
            row.try_get::<Json<Vec<(UserId, Amount, u32)>>, _>("past_winners")?,
            row.try_get("version")?,
        )?;

        let already_closed = cmd.round_number < auction.current_round
            || auction
                .rounds
                .get((cmd.round_number.saturating_sub(1)) as usize)
                .map(|r| r.completed)
                .unwrap_or(false);
        if already_closed {
            tx.commit().await?;
            return Ok(CloseRoundCommitted {
                already_closed: true,
                auction,
                refunded_bid_ids: vec![],
                carried_bid_ids: vec![],
            });
        }
        if cmd.round_number != auction.current_round {
            return Err(AppError::Internal(format!(
                "close_round requested for round {} but auction {} is on round {}",
                cmd.round_number, cmd.auction_id, auction.current_round
            )));
        }

        let winner_bid_ids: Vec<BidId> = cmd.winners.iter().map(|w| w.bid_id).collect();

        for w in &cmd.winners {
            sqlx::query(
                "UPDATE bids SET status = 'Won', won_round = $2, item_number = $3, version = version + 1 \
                 WHERE id = $1",
            )
            .bind(w.bid_id.as_uuid())
            .bind(cmd.round_number as i32)
            .bind(w.item_number as i32)
            .execute(&mut *tx)
            .await?;

            let user_row = sqlx::query(
                "SELECT id, name, is_bot, avail, frozen, version, created_at FROM users WHERE id = $1 FOR UPDATE",
            )
            .bind(w.user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", w.user_id)))?;
            let mut user = row_to_user(
                user_row.try_get("id")?,
                user_row.try_get("name")?,
                user_row.try_get("is_bot")?,
                user_row.try_get("avail")?,
                user_row.try_get("frozen")?,
                user_row.try_get("version")?,
                user_row.try_get("created_at")?,
            );
            let frozen_before = user.balance.frozen();
            let avail_before = user.balance.avail();
            user.balance
                .settle_win(w.amount)
                .map_err(|e| AppError::Internal(e.to_string()))?;
            sqlx::query("UPDATE users SET frozen = $2, version = $3 WHERE id = $1")
                .bind(user.id.as_uuid())
                .bind(user.balance.frozen() as i64)
                .bind(user.balance.version() as i64)
                .execute(&mut *tx)
                .await?;
            insert_transaction(
                &mut tx,
                &Transaction {
                    id: TransactionId::new(),
                    user_id: w.user_id,
                    kind: TransactionType::Win,
                    amount: w.amount,
                    balance_before: avail_before,
                    balance_after: user.balance.avail(),
                    frozen_before,
                    frozen_after: user.balance.frozen(),
                    auction_id: Some(cmd.auction_id),
                    bid_id: Some(w.bid_id),
                    recorded_at: cmd.now,
                },
            )
            .await?;
        }

        let more_rounds_remain = (auction.current_round as usize) < auction.spec.rounds_config.len();
        let active_rows = sqlx::query(
            "SELECT id, auction_id, user_id, amount, status, won_round, item_number, \
             carried_from_round, created_at, arrival_seq, version FROM bids \
             WHERE auction_id = $1 AND status = 'Active' FOR UPDATE",
        )
        .bind(cmd.auction_id.as_uuid())
        .fetch_all(&mut *tx)
        .await?;

        let mut refunded_bid_ids = Vec::new();
        let mut carried_bid_ids = Vec::new();
        for r in active_rows {
            let bid = row_to_bid(
                r.try_get("id")?,
                r.try_get("auction_id")?,
                r.try_get("user_id")?,
                r.try_get("amount")?,
                r.try_get("status")?,
                r.try_get("won_round")?,
                r.try_get("item_number")?,
                r.try_get("carried_from_round")?,
                r.try_get("created_at")?,
                r.try_get("arrival_seq")?,
                r.try_get("version")?,
            )?;
            if winner_bid_ids.contains(&bid.id) {
                continue;
            }
            if more_rounds_remain {
                sqlx::query(
                    "UPDATE bids SET carried_from_round = $2, version = version + 1 WHERE id = $1",
                )
                .bind(bid.id.as_uuid())
                .bind(cmd.round_number as i32)
                .execute(&mut *tx)
                .await?;
                carried_bid_ids.push(bid.id);
            } else {
                sqlx::query("UPDATE bids SET status = 'Refunded', version = version + 1 WHERE id = $1")
                    .bind(bid.id.as_uuid())
                    .execute(&mut *tx)
                    .await?;

                let user_row = sqlx::query(
                    "SELECT id, name, is_bot, avail, frozen, version, created_at FROM users WHERE id = $1 FOR UPDATE",
                )
                .bind(bid.user_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("user {}", bid.user_id)))?;
                let mut user = row_to_user(
                    user_row.try_get("id")?,
                    user_row.try_get("name")?,
                    user_row.try_get("is_bot")?,
                    user_row.try_get("avail")?,
                    user_row.try_get("frozen")?,
                    user_row.try_get("version")?,
                    user_row.try_get("created_at")?,
                );
                user.balance
                    .refund(bid.amount)
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                sqlx::query("UPDATE users SET avail = $2, frozen = $3, version = $4 WHERE id = $1")
                    .bind(user.id.as_uuid())
                    .bind(user.balance.avail() as i64)
                    .bind(user.balance.frozen() as i64)
                    .bind(user.balance.version() as i64)
                    .execute(&mut *tx)
                    .await?;
                refunded_bid_ids.push(bid.id);
            }
        }

        {
            let round = auction
                .rounds
                .get_mut((cmd.round_number - 1) as usize)
                .expect("round_number validated above");
            round.completed = true;
            round.winner_bid_ids = winner_bid_ids;
        }
        auction
            .past_winners
            .extend(cmd.winners.iter().map(|w| (w.user_id, w.amount, w.item_number)));

        if more_rounds_remain {
            let next_round_number = auction.current_round + 1;
            let config = auction.spec.rounds_config[(next_round_number - 1) as usize];
            auction.rounds.push(crate::domain::auction::RoundState::start(
                next_round_number,
                config,
                cmd.now,
            ));
            auction.current_round = next_round_number;
        } else {
            auction.status = AuctionStatus::Completed;
        }
        auction.version = auction.version.wrapping_add(1);

        sqlx::query(
            "UPDATE auctions SET status = $2, current_round = $3, rounds = $4, past_winners = $5, version = $6 \
             WHERE id = $1",
        )
        .bind(auction.id.as_uuid())
        .bind(auction_status_str(auction.status))
        .bind(auction.current_round as i32)
        .bind(Json(&auction.rounds))
        .bind(Json(&auction.past_winners))
        .bind(auction.version as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CloseRoundCommitted { already_closed: false, auction, refunded_bid_ids, carried_bid_ids })
    }
}
