//! Domain entities (SPEC_FULL.md §3): plain data + invariant-preserving
//! constructors, no persistence concerns. The `Store` owns how these are
//! written; these types just describe what is written.

pub mod audit_log;
pub mod auction;
pub mod bid;
pub mod events;
pub mod transaction;
pub mod user;
pub mod wallet;

pub use audit_log::{AuditEvent, AuditLog};
pub use auction::{Auction, AuctionSpec, AuctionStatus, RoundConfig, RoundState};
pub use bid::{Bid, BidStatus};
pub use events::Event;
pub use transaction::{Transaction, TransactionType};
pub use user::User;
pub use wallet::{Balance, BalanceError};
