//! Enforced balance type — the single source of truth for balance mutation.
//!
//! Adapted from the teacher's `balance.rs`: fields are private, every
//! mutation returns `Result`, arithmetic is checked. The teacher splits
//! version tracking into `lock_version`/`settle_version` so lock and settle
//! events can be verified independently in a pipelined matching engine; this
//! system has a single writer path per auction (the bid lock) and a single
//! `User.version` field in the data model (SPEC_FULL.md §3), so the two
//! version spaces collapse into one `version` counter here (see DESIGN.md).

use serde::{Deserialize, Serialize};

/// Balance for a single user: `avail + frozen` is always the total holding.
///
/// # Invariants
/// - `avail` and `frozen` are never negative (enforced by `u64`).
/// - No overflow/underflow: every mutation uses checked arithmetic.
/// - `version` increments on every successful mutation, for optimistic
///   concurrency via `Store::update_if`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Balance {
    avail: u64,
    frozen: u64,
    version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    #[error("insufficient available balance: has {avail}, needs {needed}")]
    InsufficientAvailable { avail: u64, needed: u64 },
    #[error("insufficient frozen balance: has {frozen}, needs {needed}")]
    InsufficientFrozen { frozen: u64, needed: u64 },
    #[error("arithmetic overflow in balance mutation")]
    Overflow,
}

impl Balance {
    pub fn new(avail: u64, frozen: u64, version: u64) -> Self {
        Self { avail, frozen, version }
    }

    #[inline(always)]
    pub const fn avail(&self) -> u64 {
        self.avail
    }

    #[inline(always)]
    pub const fn frozen(&self) -> u64 {
        self.frozen
    }

    #[inline(always)]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Total holding. `None` would indicate a corrupted row (would require
    /// `avail + frozen` to overflow `u64`, which no valid mutation sequence
    /// can reach).
    #[inline(always)]
    pub const fn total(&self) -> Option<u64> {
        self.avail.checked_add(self.frozen)
    }

    /// `balance += amount`.
    pub fn deposit(&mut self, amount: u64) -> Result<(), BalanceError> {
        self.avail = self.avail.checked_add(amount).ok_or(BalanceError::Overflow)?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// `require balance >= amount; balance -= amount`.
    pub fn withdraw(&mut self, amount: u64) -> Result<(), BalanceError> {
        if self.avail < amount {
            return Err(BalanceError::InsufficientAvailable { avail: self.avail, needed: amount });
        }
        self.avail -= amount;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// `require balance >= amount; balance -= amount; frozen += amount`.
    pub fn freeze(&mut self, amount: u64) -> Result<(), BalanceError> {
        if self.avail < amount {
            return Err(BalanceError::InsufficientAvailable { avail: self.avail, needed: amount });
        }
        self.avail -= amount;
        self.frozen = self.frozen.checked_add(amount).ok_or(BalanceError::Overflow)?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// `require frozen >= amount; frozen -= amount; balance += amount`.
    pub fn unfreeze(&mut self, amount: u64) -> Result<(), BalanceError> {
        if self.frozen < amount {
            return Err(BalanceError::InsufficientFrozen { frozen: self.frozen, needed: amount });
        }
        self.frozen -= amount;
        self.avail = self.avail.checked_add(amount).ok_or(BalanceError::Overflow)?;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// `require frozen >= amount; frozen -= amount` (no return to avail — the
    /// amount leaves the user's holdings entirely, e.g. on a winning bid).
    pub fn settle_win(&mut self, amount: u64) -> Result<(), BalanceError> {
        if self.frozen < amount {
            return Err(BalanceError::InsufficientFrozen { frozen: self.frozen, needed: amount });
        }
        self.frozen -= amount;
        self.version = self.version.wrapping_add(1);
        Ok(())
    }

    /// `require frozen >= amount; frozen -= amount; balance += amount`.
    pub fn refund(&mut self, amount: u64) -> Result<(), BalanceError> {
        self.unfreeze(amount)
    }

    /// Adjust a frozen hold by a signed delta in one step: a bid increase
    /// freezes only the delta over the prior amount (SPEC_FULL.md §4.4).
    /// Positive delta freezes more; negative delta unfreezes the difference.
    pub fn adjust_freeze(&mut self, delta: i64) -> Result<(), BalanceError> {
        match delta.cmp(&0) {
            std::cmp::Ordering::Greater => self.freeze(delta as u64),
            std::cmp::Ordering::Less => self.unfreeze(delta.unsigned_abs()),
            std::cmp::Ordering::Equal => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deposit_withdraw_roundtrip() {
        let mut b = Balance::default();
        b.deposit(1000).unwrap();
        assert_eq!(b.avail(), 1000);
        assert_eq!(b.version(), 1);

        b.withdraw(400).unwrap();
        assert_eq!(b.avail(), 600);
        assert_eq!(b.version(), 2);
    }

    #[test]
    fn withdraw_insufficient_leaves_state_untouched() {
        let mut b = Balance::default();
        b.deposit(100).unwrap();
        assert!(b.withdraw(200).is_err());
        assert_eq!(b.avail(), 100);
        assert_eq!(b.version(), 1);
    }

    #[test]
    fn freeze_then_settle_win_removes_funds_entirely() {
        let mut b = Balance::default();
        b.deposit(1000).unwrap();
        b.freeze(300).unwrap();
        assert_eq!(b.avail(), 700);
        assert_eq!(b.frozen(), 300);

        b.settle_win(300).unwrap();
        assert_eq!(b.frozen(), 0);
        assert_eq!(b.avail(), 700);
        assert_eq!(b.total(), Some(700));
    }

    #[test]
    fn refund_returns_frozen_to_avail() {
        let mut b = Balance::default();
        b.deposit(1000).unwrap();
        b.freeze(300).unwrap();
        b.refund(300).unwrap();
        assert_eq!(b.avail(), 1000);
        assert_eq!(b.frozen(), 0);
    }

    #[test]
    fn adjust_freeze_handles_bid_increase_and_decrease() {
        let mut b = Balance::default();
        b.deposit(1000).unwrap();

        b.adjust_freeze(200).unwrap(); // first bid: freeze(200)
        assert_eq!(b.avail(), 800);
        assert_eq!(b.frozen(), 200);

        b.adjust_freeze(100).unwrap(); // bid increase 200 -> 300: freeze delta 100
        assert_eq!(b.avail(), 700);
        assert_eq!(b.frozen(), 300);

        b.adjust_freeze(-300).unwrap(); // cancel: unfreeze all
        assert_eq!(b.avail(), 1000);
        assert_eq!(b.frozen(), 0);
    }

    #[test]
    fn deposit_overflow_is_rejected() {
        let mut b = Balance::default();
        b.deposit(u64::MAX).unwrap();
        assert!(b.deposit(1).is_err());
    }
}
