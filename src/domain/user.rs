//! `User` entity (SPEC_FULL.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::wallet::Balance;
use crate::core_types::UserId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub balance: Balance,
    pub is_bot: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl Into<String>, is_bot: bool, now: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            balance: Balance::default(),
            is_bot,
            created_at: now,
        }
    }
}
