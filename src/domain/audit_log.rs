//! Append-only audit journal with a closed variant schema.
//!
//! Replaces the "dynamically typed map payloads in audit-log metadata"
//! anti-pattern flagged in SPEC_FULL.md §9: every audit entry is one variant
//! of `AuditEvent`, serialized at the storage boundary only — no `HashMap<String, Value>`
//! bag anywhere in the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{Amount, AuctionId, AuditLogId, BidId, RoundNumber, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AuditEvent {
    BidFreeze { auction_id: AuctionId, bid_id: BidId, user_id: UserId, amount: Amount },
    BidAdjustFreeze { auction_id: AuctionId, bid_id: BidId, user_id: UserId, delta: i64 },
    BidWin { auction_id: AuctionId, bid_id: BidId, user_id: UserId, amount: Amount, round: RoundNumber },
    BidRefund { auction_id: AuctionId, bid_id: BidId, user_id: UserId, amount: Amount },
    RoundExtended { auction_id: AuctionId, round: RoundNumber, new_end_time: DateTime<Utc>, extensions_count: u32 },
    RoundClosed { auction_id: AuctionId, round: RoundNumber, winner_count: u32 },
    AuctionCompleted { auction_id: AuctionId, total_items_awarded: u32 },
}

impl AuditEvent {
    pub fn auction_id(&self) -> Option<AuctionId> {
        match self {
            AuditEvent::BidFreeze { auction_id, .. }
            | AuditEvent::BidAdjustFreeze { auction_id, .. }
            | AuditEvent::BidWin { auction_id, .. }
            | AuditEvent::BidRefund { auction_id, .. }
            | AuditEvent::RoundExtended { auction_id, .. }
            | AuditEvent::RoundClosed { auction_id, .. }
            | AuditEvent::AuctionCompleted { auction_id, .. } => Some(*auction_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: AuditLogId,
    pub event: AuditEvent,
    pub recorded_at: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(event: AuditEvent, now: DateTime<Utc>) -> Self {
        Self { id: AuditLogId::new(), event, recorded_at: now }
    }
}
