//! In-memory `Store` for tests (SPEC_FULL.md §4.1, "InMemoryStore"):
//! one `tokio::sync::Mutex` guards all state, so every method body below is
//! already the atomic unit the spec describes — no retry loop needed, since
//! there is no concurrent writer to lose a race to.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::core_types::{Amount, ArrivalSeq, AuctionId, BidId, TransactionId, UserId};
use crate::domain::auction::AuctionStatus;
use crate::domain::bid::BidStatus;
use crate::domain::{Auction, AuditLog, Bid, RoundState, Transaction, TransactionType, User};
use crate::error::{AppError, AppResult};

use super::{
    BalanceAggregate, CloseRoundCommand, CloseRoundCommitted, PlaceBidCommand, PlaceBidCommitted,
    Store, TransactionTotals,
};

fn balance_err(user_id: UserId, e: crate::domain::BalanceError) -> AppError {
    use crate::domain::BalanceError::*;
    match e {
        InsufficientAvailable { avail, needed } => {
            AppError::InsufficientBalance { user_id, needed, available: avail }
        }
        InsufficientFrozen { frozen, needed } => {
            AppError::InsufficientBalance { user_id, needed, available: frozen }
        }
        Overflow => AppError::Internal("balance arithmetic overflow".into()),
    }
}

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    auctions: HashMap<AuctionId, Auction>,
    bids: HashMap<BidId, Bid>,
    seqs: HashMap<AuctionId, ArrivalSeq>,
    transactions: Vec<Transaction>,
    audit_logs: Vec<AuditLog>,
}

impl State {
    fn next_arrival_seq(&mut self, auction_id: AuctionId) -> ArrivalSeq {
        let counter = self.seqs.entry(auction_id).or_insert(0);
        *counter += 1;
        *counter
    }
}

/// Test double implementing [`Store`] entirely in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_user(&self, id: UserId) -> AppResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn find_auction(&self, id: AuctionId) -> AppResult<Option<Auction>> {
        Ok(self.state.lock().await.auctions.get(&id).cloned())
    }

    async fn find_bid(&self, id: BidId) -> AppResult<Option<Bid>> {
        Ok(self.state.lock().await.bids.get(&id).cloned())
    }

    async fn find_active_bid_for_user(
        &self,
        auction_id: AuctionId,
        user_id: UserId,
    ) -> AppResult<Option<Bid>> {
        let state = self.state.lock().await;
        Ok(state
            .bids
            .values()
            .find(|b| b.auction_id == auction_id && b.user_id == user_id && b.is_active())
            .cloned())
    }

    async fn find_active_bids_by_auction(&self, auction_id: AuctionId) -> AppResult<Vec<Bid>> {
        let state = self.state.lock().await;
        Ok(state
            .bids
            .values()
            .filter(|b| b.auction_id == auction_id && b.is_active())
            .cloned()
            .collect())
    }

    async fn find_user_bids(&self, auction_id: AuctionId, user_id: UserId) -> AppResult<Vec<Bid>> {
        let state = self.state.lock().await;
        Ok(state
            .bids
            .values()
            .filter(|b| b.auction_id == auction_id && b.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_due_auctions(&self, now: DateTime<Utc>) -> AppResult<Vec<AuctionId>> {
        let state = self.state.lock().await;
        Ok(state
            .auctions
            .values()
            .filter(|a| {
                a.is_active()
                    && a.current_round_state().is_some_and(|r| r.end_time <= now && !r.completed)
            })
            .map(|a| a.id)
            .collect())
    }

    async fn list_active_auctions(&self) -> AppResult<Vec<AuctionId>> {
        let state = self.state.lock().await;
        Ok(state.auctions.values().filter(|a| a.is_active()).map(|a| a.id).collect())
    }

    async fn aggregate_balances(&self) -> AppResult<BalanceAggregate> {
        let state = self.state.lock().await;
        let mut agg = BalanceAggregate::default();
        for u in state.users.values() {
            agg.total_avail += u.balance.avail() as u128;
            agg.total_frozen += u.balance.frozen() as u128;
        }
        Ok(agg)
    }

    async fn aggregate_transactions(&self) -> AppResult<TransactionTotals> {
        let state = self.state.lock().await;
        let mut totals = TransactionTotals::default();
        for txn in &state.transactions {
            match txn.kind {
                TransactionType::Deposit => totals.deposits += txn.amount as u128,
                TransactionType::Withdraw => totals.withdrawals += txn.amount as u128,
                TransactionType::Win => totals.wins += txn.amount as u128,
                TransactionType::Freeze | TransactionType::Unfreeze | TransactionType::Refund => {}
            }
        }
        Ok(totals)
    }

    async fn create_user(&self, user: User) -> AppResult<()> {
        self.state.lock().await.users.insert(user.id, user);
        Ok(())
    }

    async fn create_auction(&self, auction: Auction) -> AppResult<()> {
        self.state.lock().await.auctions.insert(auction.id, auction);
        Ok(())
    }

    async fn start_auction(&self, auction_id: AuctionId, now: DateTime<Utc>) -> AppResult<Auction> {
        let mut state = self.state.lock().await;
        let auction = state
            .auctions
            .get_mut(&auction_id)
            .ok_or_else(|| AppError::NotFound(format!("auction {auction_id}")))?;
        auction.start(now)?;
        Ok(auction.clone())
    }

    async fn wallet_deposit(
        &self,
        user_id: UserId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> AppResult<(User, Transaction)> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;
        let balance_before = user.balance.avail();
        let frozen_before = user.balance.frozen();
        user.balance.deposit(amount).map_err(|e| balance_err(user_id, e))?;
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
        let user = user.clone();
        state.transactions.push(txn.clone());
        Ok((user, txn))
    }

    async fn wallet_withdraw(
        &self,
        user_id: UserId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> AppResult<(User, Transaction)> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?;
        let balance_before = user.balance.avail();
        let frozen_before = user.balance.frozen();
        user.balance.withdraw(amount).map_err(|e| balance_err(user_id, e))?;
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
        let user = user.clone();
        state.transactions.push(txn.clone());
        Ok((user, txn))
    }

    async fn place_bid(&self, cmd: PlaceBidCommand) -> AppResult<PlaceBidCommitted> {
        let PlaceBidCommand {
            auction_id,
            user_id,
            amount,
            now,
            anti_snipe_window,
            anti_snipe_extension,
            max_extensions,
        } = cmd;
        let mut state = self.state.lock().await;

        let auction = state
            .auctions
            .get(&auction_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("auction {auction_id}")))?;
        if !auction.is_active() {
            return Err(AppError::AuctionNotActive(auction_id));
        }

        let amount_taken = state.bids.values().any(|b| {
            b.auction_id == auction_id && b.is_active() && b.amount == amount && b.user_id != user_id
        });
        if amount_taken {
            return Err(AppError::AmountTaken { auction_id });
        }

        let existing = state
            .bids
            .values()
            .find(|b| b.auction_id == auction_id && b.user_id == user_id && b.is_active())
            .cloned();

        let (delta, previous_amount) = match &existing {
            Some(b) => {
                let min_needed = b
                    .amount
                    .checked_add(auction.spec.min_bid_increment)
                    .ok_or_else(|| AppError::Internal("bid increment overflow".into()))?;
                if amount < min_needed {
                    return Err(AppError::IncrementTooSmall {
                        auction_id,
                        min_increment: auction.spec.min_bid_increment,
                    });
                }
                (amount as i64 - b.amount as i64, Some(b.amount))
            }
            None => {
                if amount < auction.spec.min_bid_amount {
                    return Err(AppError::BidTooLow { auction_id, amount, min: auction.spec.min_bid_amount });
                }
                (amount as i64, None)
            }
        };

        let avail = state
            .users
            .get(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("user {user_id}")))?
            .balance
            .avail();
        if delta > 0 && (delta as u64) > avail {
            return Err(AppError::InsufficientBalance { user_id, needed: delta as u64, available: avail });
        }

        {
            let user = state.users.get_mut(&user_id).unwrap();
            user.balance.adjust_freeze(delta).map_err(|e| balance_err(user_id, e))?;
        }

        let seq = state.next_arrival_seq(auction_id);

        let bid = match existing {
            Some(mut b) => {
                b.amount = amount;
                b.arrival_seq = seq;
                b.version = b.version.wrapping_add(1);
                state.bids.insert(b.id, b.clone());
                b
            }
            None => {
                let b = Bid::new_active(auction_id, user_id, amount, seq, now);
                state.bids.insert(b.id, b.clone());
                b
            }
        };

        let extension = {
            let auction = state.auctions.get_mut(&auction_id).unwrap();
            let round = auction.current_round_state_mut().expect("active auction has a current round");
            if round.end_time - now <= anti_snipe_window && round.extensions_count < max_extensions {
                round.end_time += anti_snipe_extension;
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

        Ok(PlaceBidCommitted { bid, previous_amount, extension })
    }

    async fn close_round(&self, cmd: CloseRoundCommand) -> AppResult<CloseRoundCommitted> {
        let CloseRoundCommand { auction_id, round_number, winners, now } = cmd;
        let mut state = self.state.lock().await;

        let mut auction = state
            .auctions
            .get(&auction_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("auction {auction_id}")))?;

        let already_closed = round_number < auction.current_round
            || auction
                .rounds
                .get((round_number.saturating_sub(1)) as usize)
                .map(|r| r.completed)
                .unwrap_or(false);
        if already_closed {
            return Ok(CloseRoundCommitted {
                already_closed: true,
                auction,
                refunded_bid_ids: vec![],
                carried_bid_ids: vec![],
            });
        }
        if round_number != auction.current_round {
            return Err(AppError::Internal(format!(
                "close_round requested for round {round_number} but auction {auction_id} is on round {}",
                auction.current_round
            )));
        }

        let winner_bid_ids: Vec<BidId> = winners.iter().map(|w| w.bid_id).collect();

        for w in &winners {
            let bid = state
                .bids
                .get_mut(&w.bid_id)
                .ok_or_else(|| AppError::NotFound(format!("bid {}", w.bid_id)))?;
            bid.status = BidStatus::Won;
            bid.won_round = Some(round_number);
            bid.item_number = Some(w.item_number);
            bid.version = bid.version.wrapping_add(1);

            let user = state
                .users
                .get_mut(&w.user_id)
                .ok_or_else(|| AppError::NotFound(format!("user {}", w.user_id)))?;
            let frozen_before = user.balance.frozen();
            let avail_before = user.balance.avail();
            user.balance.settle_win(w.amount).map_err(|e| balance_err(w.user_id, e))?;
            state.transactions.push(Transaction {
                id: TransactionId::new(),
                user_id: w.user_id,
                kind: TransactionType::Win,
                amount: w.amount,
                balance_before: avail_before,
                balance_after: user.balance.avail(),
                frozen_before,
                frozen_after: user.balance.frozen(),
                auction_id: Some(auction_id),
                bid_id: Some(w.bid_id),
                recorded_at: now,
            });
        }

        let more_rounds_remain = (auction.current_round as usize) < auction.spec.rounds_config.len();
        let active_non_winners: Vec<BidId> = state
            .bids
            .values()
            .filter(|b| b.auction_id == auction_id && b.is_active() && !winner_bid_ids.contains(&b.id))
            .map(|b| b.id)
            .collect();

        let mut refunded_bid_ids = Vec::new();
        let mut carried_bid_ids = Vec::new();
        for bid_id in active_non_winners {
            if more_rounds_remain {
                let bid = state.bids.get_mut(&bid_id).unwrap();
                bid.carried_from_round = Some(round_number);
                bid.version = bid.version.wrapping_add(1);
                carried_bid_ids.push(bid_id);
            } else {
                let (amount, user_id) = {
                    let bid = state.bids.get_mut(&bid_id).unwrap();
                    bid.status = BidStatus::Refunded;
                    bid.version = bid.version.wrapping_add(1);
                    (bid.amount, bid.user_id)
                };
                let user = state.users.get_mut(&user_id).unwrap();
                user.balance.refund(amount).map_err(|e| balance_err(user_id, e))?;
                refunded_bid_ids.push(bid_id);
            }
        }

        {
            let round = auction
                .rounds
                .get_mut((round_number - 1) as usize)
                .expect("round_number validated above");
            round.completed = true;
            round.winner_bid_ids = winner_bid_ids;
        }
        auction
            .past_winners
            .extend(winners.iter().map(|w| (w.user_id, w.amount, w.item_number)));

        if more_rounds_remain {
            let next_round_number = auction.current_round + 1;
            let config = auction.spec.rounds_config[(next_round_number - 1) as usize];
            auction.rounds.push(RoundState::start(next_round_number, config, now));
            auction.current_round = next_round_number;
        } else {
            auction.status = AuctionStatus::Completed;
        }
        auction.version = auction.version.wrapping_add(1);

        state.auctions.insert(auction_id, auction.clone());

        Ok(CloseRoundCommitted { already_closed: false, auction, refunded_bid_ids, carried_bid_ids })
    }

    async fn peek_arrival_seq(&self, auction_id: AuctionId) -> AppResult<ArrivalSeq> {
        let state = self.state.lock().await;
        Ok(state.seqs.get(&auction_id).copied().unwrap_or(0) + 1)
    }

    async fn append_audit_log(&self, log: AuditLog) -> AppResult<()> {
        self.state.lock().await.audit_logs.push(log);
        Ok(())
    }

    async fn list_audit_logs(&self, auction_id: Option<AuctionId>) -> AppResult<Vec<AuditLog>> {
        let state = self.state.lock().await;
        Ok(match auction_id {
            None => state.audit_logs.clone(),
            Some(id) => state
                .audit_logs
                .iter()
                .filter(|log| log.event.auction_id() == Some(id))
                .cloned()
                .collect(),
        })
    }
}
