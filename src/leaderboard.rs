//! `LeaderboardIndex` (SPEC_FULL.md §4.2): a fast in-memory ranking of active
//! bids per auction, kept warm so `GetLeaderboard`/`GetMinWinningBid` never
//! have to scan the `Store`.
//!
//! Grounded on the teacher's `websocket/ws_broadcast_service.rs`
//! `ConnectionManager`, which shards a `DashMap<u64, Vec<...>>` keyed by
//! symbol id rather than taking one global lock per update. Here the shard
//! key is `AuctionId` and the per-auction value is an ordered set instead of
//! a connection list.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use dashmap::DashMap;

use crate::core_types::{Amount, ArrivalSeq, AuctionId, BidId, UserId};

/// Score ordering: higher amount wins; on a tie, the bid that arrived first
/// (lower `arrival_seq`) wins (SPEC_FULL.md Open Question 3). `Reverse` on
/// both fields turns `BTreeSet`'s ascending order into "best entry first".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    amount_desc: Reverse<Amount>,
    arrival_seq_asc: ArrivalSeq,
    bid_id: BidId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub bid_id: BidId,
    pub user_id: UserId,
    pub amount: Amount,
    pub rank: u32,
}

#[derive(Default)]
struct AuctionBoard {
    by_rank: BTreeSet<Rank>,
    /// Current `(Rank, owner)` per tracked bid — lets [`LeaderboardIndex::upsert`]
    /// find and remove a bid's stale position in O(log n) without the caller
    /// needing to remember its previous amount/arrival_seq.
    positions: HashMap<BidId, (Rank, UserId)>,
}

/// Per-auction ranked index of active bids, sharded by `DashMap` so unrelated
/// auctions never contend on the same lock.
pub struct LeaderboardIndex {
    boards: DashMap<AuctionId, AuctionBoard>,
}

impl Default for LeaderboardIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderboardIndex {
    pub fn new() -> Self {
        Self { boards: DashMap::new() }
    }

    /// Inserts a bid, or repositions it if already tracked (a bid increase
    /// changes its amount/arrival_seq, which changes its sort key).
    pub fn upsert(&self, auction_id: AuctionId, bid_id: BidId, user_id: UserId, amount: Amount, arrival_seq: ArrivalSeq) {
        let mut board = self.boards.entry(auction_id).or_default();
        if let Some((old_rank, _)) = board.positions.remove(&bid_id) {
            board.by_rank.remove(&old_rank);
        }
        let rank = Rank { amount_desc: Reverse(amount), arrival_seq_asc: arrival_seq, bid_id };
        board.by_rank.insert(rank);
        board.positions.insert(bid_id, (rank, user_id));
    }

    /// Drops a bid entirely — it won, lost, was refunded, or was carried
    /// over and needs to be re-inserted by the next round's `upsert` call.
    pub fn remove(&self, auction_id: AuctionId, bid_id: BidId) {
        if let Some(mut board) = self.boards.get_mut(&auction_id) {
            if let Some((rank, _)) = board.positions.remove(&bid_id) {
                board.by_rank.remove(&rank);
            }
        }
    }

    pub fn remove_many(&self, auction_id: AuctionId, bid_ids: &[BidId]) {
        if let Some(mut board) = self.boards.get_mut(&auction_id) {
            for bid_id in bid_ids {
                if let Some((rank, _)) = board.positions.remove(bid_id) {
                    board.by_rank.remove(&rank);
                }
            }
        }
    }

    /// Clears every entry for an auction and rebuilds from scratch — used by
    /// the reconciler after a restart or a detected drift from `Store`.
    pub fn rebuild(&self, auction_id: AuctionId, entries: impl IntoIterator<Item = (BidId, UserId, Amount, ArrivalSeq)>) {
        let mut board = AuctionBoard::default();
        for (bid_id, user_id, amount, arrival_seq) in entries {
            let rank = Rank { amount_desc: Reverse(amount), arrival_seq_asc: arrival_seq, bid_id };
            board.by_rank.insert(rank);
            board.positions.insert(bid_id, (rank, user_id));
        }
        self.boards.insert(auction_id, board);
    }

    pub fn top_n(&self, auction_id: AuctionId, n: u32) -> Vec<LeaderboardEntry> {
        let Some(board) = self.boards.get(&auction_id) else { return Vec::new() };
        board
            .by_rank
            .iter()
            .take(n as usize)
            .enumerate()
            .map(|(i, r)| LeaderboardEntry {
                bid_id: r.bid_id,
                user_id: board.positions.get(&r.bid_id).expect("position tracked alongside rank").1,
                amount: r.amount_desc.0,
                rank: i as u32 + 1,
            })
            .collect()
    }

    /// 1-based rank of a bid, or `None` if it isn't tracked.
    pub fn rank_of(&self, auction_id: AuctionId, bid_id: BidId) -> Option<u32> {
        let board = self.boards.get(&auction_id)?;
        board.by_rank.iter().position(|r| r.bid_id == bid_id).map(|i| i as u32 + 1)
    }

    pub fn count(&self, auction_id: AuctionId) -> u32 {
        self.boards.get(&auction_id).map(|b| b.by_rank.len() as u32).unwrap_or(0)
    }

    /// The bid amount that would currently still win a slot: the `n`-th
    /// highest amount, or the auction's floor if fewer than `n` active bids
    /// exist (SPEC_FULL.md §6 `GetMinWinningBid`, Open Question 2 — never
    /// returns `None` at the boundary).
    pub fn min_winning_amount(&self, auction_id: AuctionId, items_remaining: u32, floor: Amount) -> Amount {
        let Some(board) = self.boards.get(&auction_id) else { return floor };
        if items_remaining == 0 {
            return floor;
        }
        board
            .by_rank
            .iter()
            .nth((items_remaining - 1) as usize)
            .map(|r| r.amount_desc.0)
            .unwrap_or(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn bid_id(n: u128) -> BidId {
        BidId::from_uuid(Uuid::from_u128(n))
    }
    fn user_id(n: u128) -> UserId {
        UserId::from_uuid(Uuid::from_u128(n))
    }

    #[test]
    fn higher_amount_ranks_first() {
        let lb = LeaderboardIndex::new();
        let auction = AuctionId::new();
        lb.upsert(auction, bid_id(1), user_id(1), 100, 1);
        lb.upsert(auction, bid_id(2), user_id(2), 200, 2);

        let top = lb.top_n(auction, 10);
        assert_eq!(top[0].bid_id, bid_id(2));
        assert_eq!(top[0].rank, 1);
        assert_eq!(top[1].bid_id, bid_id(1));
    }

    #[test]
    fn tie_breaks_by_earlier_arrival_seq() {
        let lb = LeaderboardIndex::new();
        let auction = AuctionId::new();
        lb.upsert(auction, bid_id(1), user_id(1), 100, 5);
        lb.upsert(auction, bid_id(2), user_id(2), 100, 2);

        let top = lb.top_n(auction, 10);
        assert_eq!(top[0].bid_id, bid_id(2)); // arrived earlier at seq 2
        assert_eq!(top[1].bid_id, bid_id(1));
    }

    #[test]
    fn upsert_on_existing_bid_moves_rank() {
        let lb = LeaderboardIndex::new();
        let auction = AuctionId::new();
        lb.upsert(auction, bid_id(1), user_id(1), 100, 1);
        lb.upsert(auction, bid_id(1), user_id(1), 150, 3); // bid increase

        let top = lb.top_n(auction, 10);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].amount, 150);
    }

    #[test]
    fn remove_drops_bid_entirely() {
        let lb = LeaderboardIndex::new();
        let auction = AuctionId::new();
        lb.upsert(auction, bid_id(1), user_id(1), 100, 1);
        lb.remove(auction, bid_id(1));
        assert_eq!(lb.count(auction), 0);
    }

    #[test]
    fn min_winning_amount_falls_back_to_floor_when_under_subscribed() {
        let lb = LeaderboardIndex::new();
        let auction = AuctionId::new();
        lb.upsert(auction, bid_id(1), user_id(1), 500, 1);

        assert_eq!(lb.min_winning_amount(auction, 3, 100), 100);
        assert_eq!(lb.min_winning_amount(auction, 1, 100), 500);
    }
}
