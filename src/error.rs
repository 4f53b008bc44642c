//! Core error taxonomy (SPEC_FULL.md §7).
//!
//! Every public operation returns `Result<_, AppError>`. Each variant carries
//! a short machine-readable `code()` plus a human `Display` message, the same
//! shape the teacher's `AuthErrorCode` uses (numeric/string code + message)
//! but expressed as a `thiserror` enum instead of a hand-rolled status type,
//! since there is no HTTP status to attach here.

use thiserror::Error;

use crate::core_types::{AuctionId, BidId, UserId};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("auction {0} is not active")]
    AuctionNotActive(AuctionId),

    #[error("bid amount below minimum bid for auction {auction_id}: got {amount}, need at least {min}")]
    BidTooLow {
        auction_id: AuctionId,
        amount: u64,
        min: u64,
    },

    #[error("bid increase too small for auction {auction_id}: need at least +{min_increment}")]
    IncrementTooSmall {
        auction_id: AuctionId,
        min_increment: u64,
    },

    #[error("user {user_id} has insufficient balance: need {needed}, has {available}")]
    InsufficientBalance {
        user_id: UserId,
        needed: u64,
        available: u64,
    },

    #[error("amount already held by another active bid in auction {auction_id}")]
    AmountTaken { auction_id: AuctionId },

    #[error("auction {0} bid lock is contended, retry with jitter")]
    Contended(AuctionId),

    #[error("optimistic concurrency conflict on {entity}")]
    VersionMismatch { entity: String },

    #[error("transaction retry budget exhausted after {attempts} attempts")]
    ConflictExhausted { attempts: u32 },

    #[error("lock busy: {0}")]
    LockBusy(String),

    #[error("bid {0} is not eligible for this operation")]
    BidNotEligible(BidId),

    #[error("invalid auction specification: {0}")]
    InvalidSpec(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short machine-readable tag, stable across releases, for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::AuctionNotActive(_) => "AUCTION_NOT_ACTIVE",
            AppError::BidTooLow { .. } => "BID_TOO_LOW",
            AppError::IncrementTooSmall { .. } => "INCREMENT_TOO_SMALL",
            AppError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            AppError::AmountTaken { .. } => "AMOUNT_TAKEN",
            AppError::Contended(_) => "CONTENDED",
            AppError::VersionMismatch { .. } => "VERSION_MISMATCH",
            AppError::ConflictExhausted { .. } => "CONFLICT_EXHAUSTED",
            AppError::LockBusy(_) => "LOCK_BUSY",
            AppError::BidNotEligible(_) => "BID_NOT_ELIGIBLE",
            AppError::InvalidSpec(_) => "INVALID_SPEC",
            AppError::Store(_) => "STORE_ERROR",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether a client should retry this failure (with jitter), per §7's recovery column.
    pub fn is_retryable_by_client(&self) -> bool {
        matches!(self, AppError::Contended(_) | AppError::ConflictExhausted { .. })
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Store(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
