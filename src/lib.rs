//! Sealed-ascending, multi-round, multi-item auction engine.
//!
//! A per-auction bid lock serializes admission, a round scheduler closes
//! rounds on their clock, and a leaderboard index answers ranking queries
//! without touching the store. See `SPEC_FULL.md` for the full specification
//! and `DESIGN.md` for the grounding ledger behind each module below.
//!
//! # Modules
//!
//! - [`core_types`] - opaque entity ids and domain-wide type aliases
//! - [`error`] - the `AppError` taxonomy every public operation returns
//! - [`clock`] - mockable time source
//! - [`config`] - process-wide configuration
//! - [`logging`] - structured logging setup
//! - [`domain`] - entities: `User`, `Auction`, `Bid`, `Transaction`, `AuditLog`, `Event`
//! - [`store`] - the persistence + atomic-transaction boundary (`Store` trait, `PgStore`, `InMemoryStore`)
//! - [`leaderboard`] - in-process ranking index
//! - [`locks`] - distributed lease-based locks
//! - [`pubsub`] - internal typed-event bus
//! - [`bid_engine`] - bid validation and commit
//! - [`round_closer`] - round settlement
//! - [`scheduler`] - polls for due rounds
//! - [`countdown`] - periodic `Countdown` event emission
//! - [`bots`] - optional simulated bidders
//! - [`audit`] - financial-integrity verifier
//! - [`reconciler`] - rebuilds the leaderboard from store state
//! - [`service`] - the external operation surface (`AuctionService`)

pub mod core_types;
pub mod error;

pub mod clock;
pub mod config;
pub mod logging;

pub mod domain;
pub mod store;

pub mod leaderboard;
pub mod locks;
pub mod pubsub;

pub mod bid_engine;
pub mod countdown;
pub mod round_closer;
pub mod scheduler;

pub mod audit;
pub mod bots;
pub mod reconciler;

pub mod service;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use core_types::{AuctionId, BidId, TransactionId, UserId};
pub use error::{AppError, AppResult};
pub use service::AuctionService;
pub use store::Store;
