//! Process-wide configuration, loaded once at startup from the environment.
//!
//! Replaces the "global mutable singleton" pattern flagged in SPEC_FULL.md §9:
//! `AppConfig` is built once in the composition root and handed to every
//! component as `Arc<AppConfig>` or by value where `Copy` suffices. No
//! component reaches for an ambient global.

use std::time::Duration;

/// Enumerated configuration (SPEC_FULL.md §6), with every default named there.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres connection string for the `Store`.
    pub database_url: String,
    /// `sqlx::PgPoolOptions::max_connections`.
    pub pg_pool_size: u32,
    /// `sqlx::PgPoolOptions::acquire_timeout`.
    pub pg_acquire_timeout: Duration,

    /// Max attempts for `Store::with_tx` before surfacing `ConflictExhausted`.
    pub max_retries_tx: u32,
    /// Lease duration for the per-auction bid lock.
    pub bid_lock_lease: Duration,
    /// Lease duration for the per-round close lock.
    pub close_lock_lease: Duration,
    /// Interval between `Countdown` event emissions.
    pub countdown_tick: Duration,
    /// `RoundScheduler` polling interval.
    pub scheduler_tick: Duration,
    /// Leaderboard score multiplier (`amount * K + tie-break term`).
    pub leaderboard_score_k: u128,
    /// Upper bound on serialized auction-creation payload size.
    pub max_init_data_len: usize,
    /// Sane upper bound on a single bid amount, rejects fat-fingered input.
    pub max_bid_amount: u64,

    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl AppConfig {
    /// Build configuration from environment variables, falling back to the
    /// defaults enumerated in SPEC_FULL.md §6.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/auction".to_string()),
            pg_pool_size: env_u32("PG_POOL_SIZE", 10),
            pg_acquire_timeout: Duration::from_millis(env_u64("PG_ACQUIRE_TIMEOUT_MS", 5_000)),

            max_retries_tx: env_u32("MAX_RETRIES_TX", 5),
            bid_lock_lease: Duration::from_millis(env_u64("BID_LOCK_LEASE_MS", 5_000)),
            close_lock_lease: Duration::from_millis(env_u64("CLOSE_LOCK_LEASE_MS", 30_000)),
            countdown_tick: Duration::from_millis(env_u64("COUNTDOWN_TICK_MS", 1_000)),
            scheduler_tick: Duration::from_millis(env_u64("SCHEDULER_TICK_MS", 500)),
            leaderboard_score_k: 10u128.pow(13),
            max_init_data_len: env_u64("MAX_INIT_DATA_LEN", 4_096) as usize,
            max_bid_amount: env_u64("MAX_BID_AMOUNT", 1_000_000_000_000),

            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: match std::env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/auction".to_string(),
            pg_pool_size: 10,
            pg_acquire_timeout: Duration::from_millis(5_000),
            max_retries_tx: 5,
            bid_lock_lease: Duration::from_millis(5_000),
            close_lock_lease: Duration::from_millis(30_000),
            countdown_tick: Duration::from_millis(1_000),
            scheduler_tick: Duration::from_millis(500),
            leaderboard_score_k: 10u128.pow(13),
            max_init_data_len: 4_096,
            max_bid_amount: 1_000_000_000_000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_enumeration() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.max_retries_tx, 5);
        assert_eq!(cfg.bid_lock_lease, Duration::from_millis(5_000));
        assert_eq!(cfg.close_lock_lease, Duration::from_millis(30_000));
        assert_eq!(cfg.countdown_tick, Duration::from_millis(1_000));
        assert_eq!(cfg.scheduler_tick, Duration::from_millis(500));
        assert_eq!(cfg.leaderboard_score_k, 10_000_000_000_000);
        assert_eq!(cfg.max_init_data_len, 4_096);
    }
}
