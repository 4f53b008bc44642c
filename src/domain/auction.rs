//! `Auction` and `RoundState` entities (SPEC_FULL.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{Amount, AuctionId, BidId, RoundNumber, UserId};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionStatus {
    Pending,
    Active,
    Completed,
}

/// One entry of the owner-supplied round plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoundConfig {
    pub items_count: u32,
    pub duration_minutes: i64,
}

/// Mutable state of a single round within an auction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundState {
    pub round_number: RoundNumber,
    pub items_count: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub extensions_count: u32,
    pub completed: bool,
    pub winner_bid_ids: Vec<BidId>,
}

impl RoundState {
    pub fn start(round_number: RoundNumber, config: RoundConfig, now: DateTime<Utc>) -> Self {
        Self {
            round_number,
            items_count: config.items_count,
            start_time: now,
            end_time: now + chrono::Duration::minutes(config.duration_minutes),
            extensions_count: 0,
            completed: false,
            winner_bid_ids: Vec::new(),
        }
    }
}

/// Owner-supplied creation parameters (SPEC_FULL.md §6 `CreateAuction`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionSpec {
    pub title: String,
    pub description: Option<String>,
    pub total_items: u32,
    pub rounds_config: Vec<RoundConfig>,
    pub min_bid_amount: Amount,
    pub min_bid_increment: Amount,
    pub anti_snipe_window_minutes: i64,
    pub anti_snipe_extension_minutes: i64,
    pub max_extensions: u32,
    pub bots_enabled: bool,
    pub bot_count: u32,
}

impl AuctionSpec {
    /// `Σ itemsCount == totalItems`, every value > 0.
    pub fn validate(&self) -> AppResult<()> {
        if self.total_items == 0 {
            return Err(AppError::InvalidSpec("totalItems must be > 0".into()));
        }
        if self.rounds_config.is_empty() {
            return Err(AppError::InvalidSpec("roundsConfig must not be empty".into()));
        }
        let sum: u32 = self.rounds_config.iter().map(|r| r.items_count).sum();
        if sum != self.total_items {
            return Err(AppError::InvalidSpec(format!(
                "sum of roundsConfig.itemsCount ({sum}) must equal totalItems ({})",
                self.total_items
            )));
        }
        for (i, r) in self.rounds_config.iter().enumerate() {
            if r.items_count == 0 {
                return Err(AppError::InvalidSpec(format!("round {i} itemsCount must be > 0")));
            }
            if r.duration_minutes <= 0 {
                return Err(AppError::InvalidSpec(format!("round {i} durationMinutes must be > 0")));
            }
        }
        if self.min_bid_amount == 0 {
            return Err(AppError::InvalidSpec("minBidAmount must be > 0".into()));
        }
        if self.min_bid_increment == 0 {
            return Err(AppError::InvalidSpec("minBidIncrement must be > 0".into()));
        }
        if self.anti_snipe_window_minutes < 0 || self.anti_snipe_extension_minutes < 0 {
            return Err(AppError::InvalidSpec(
                "anti-snipe window/extension must be non-negative".into(),
            ));
        }
        if self.bots_enabled && self.bot_count == 0 {
            return Err(AppError::InvalidSpec("botCount must be > 0 when botsEnabled".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    pub id: AuctionId,
    pub owner: UserId,
    pub spec: AuctionSpec,
    pub status: AuctionStatus,
    /// 1-based.
    pub current_round: RoundNumber,
    pub rounds: Vec<RoundState>,
    pub past_winners: Vec<(UserId, Amount, u32)>,
    pub version: u64,
}

impl Auction {
    pub fn new(owner: UserId, spec: AuctionSpec) -> Self {
        Self {
            id: AuctionId::new(),
            owner,
            spec,
            status: AuctionStatus::Pending,
            current_round: 0,
            rounds: Vec::new(),
            past_winners: Vec::new(),
            version: 0,
        }
    }

    pub fn current_round_state(&self) -> Option<&RoundState> {
        if self.current_round == 0 {
            return None;
        }
        self.rounds.get((self.current_round - 1) as usize)
    }

    pub fn current_round_state_mut(&mut self) -> Option<&mut RoundState> {
        if self.current_round == 0 {
            return None;
        }
        self.rounds.get_mut((self.current_round - 1) as usize)
    }

    pub fn current_round_config(&self) -> Option<RoundConfig> {
        if self.current_round == 0 {
            return None;
        }
        self.spec.rounds_config.get((self.current_round - 1) as usize).copied()
    }

    pub fn is_active(&self) -> bool {
        self.status == AuctionStatus::Active
    }

    /// `StartAuction` — requires `status = pending`.
    pub fn start(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        if self.status != AuctionStatus::Pending {
            return Err(AppError::InvalidSpec("auction already started".into()));
        }
        self.current_round = 1;
        let config = self.spec.rounds_config[0];
        self.rounds.push(RoundState::start(1, config, now));
        self.status = AuctionStatus::Active;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }
}
