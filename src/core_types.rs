//! Core opaque identifier types used throughout the system.
//!
//! Every entity is addressed by an opaque id rather than an owning reference,
//! so `User`, `Auction`, and `Bid` never hold each other directly (see
//! DESIGN.md, "object-graph cycles").

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

opaque_id!(UserId);
opaque_id!(AuctionId);
opaque_id!(BidId);
opaque_id!(TransactionId);
opaque_id!(AuditLogId);

/// 1-based round number within an auction.
pub type RoundNumber = u32;

/// Monotonic per-auction arrival sequence, assigned at bid-commit time.
///
/// Resolves tie-breaking when two bids would otherwise record identical
/// wall-clock millis (see SPEC_FULL.md Open Question 3): the leaderboard
/// score is derived from `(amount, arrival_seq)`, never raw timestamps.
pub type ArrivalSeq = u64;

/// Bid amount, always a positive integer in the auction's base unit.
pub type Amount = u64;
