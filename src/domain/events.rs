//! Real-time fan-out event shapes (SPEC_FULL.md §6, §4.7).
//!
//! Topic for every variant below is `auction:{auction_id}`. These are the
//! payloads `PubSub` transports; the WebSocket/HTTP delivery of them to an
//! external client is the excluded "notification delivery transport"
//! non-goal — this crate stops at handing a typed `Event` to a subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{Amount, AuctionId, RoundNumber, UserId};
use crate::domain::auction::Auction;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidWinner {
    pub user_id: UserId,
    pub amount: Amount,
    pub item_number: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    NewBid {
        auction_id: AuctionId,
        user_id: UserId,
        amount: Amount,
        rank: u32,
        at: DateTime<Utc>,
    },
    AuctionUpdate {
        auction: Auction,
    },
    AntiSnipingExtended {
        auction_id: AuctionId,
        round_number: RoundNumber,
        new_end_time: DateTime<Utc>,
        extensions_count: u32,
    },
    RoundStart {
        auction_id: AuctionId,
        round_number: RoundNumber,
        items_count: u32,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    },
    RoundComplete {
        auction_id: AuctionId,
        round_number: RoundNumber,
        winners: Vec<BidWinner>,
    },
    AuctionComplete {
        auction_id: AuctionId,
    },
    Countdown {
        auction_id: AuctionId,
        round_number: RoundNumber,
        seconds_remaining: i64,
    },
}

impl Event {
    /// `topic = auction:{id}` for every event shape this core emits.
    pub fn topic(&self) -> String {
        let id = match self {
            Event::NewBid { auction_id, .. }
            | Event::AntiSnipingExtended { auction_id, .. }
            | Event::RoundStart { auction_id, .. }
            | Event::RoundComplete { auction_id, .. }
            | Event::AuctionComplete { auction_id }
            | Event::Countdown { auction_id, .. } => *auction_id,
            Event::AuctionUpdate { auction } => auction.id,
        };
        format!("auction:{id}")
    }
}
