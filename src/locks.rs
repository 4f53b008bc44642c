//! Lease-based distributed locks (SPEC_FULL.md §4.3): `auction:{id}:bid`
//! serializes concurrent bidders on one auction; `auction:{id}:close:r{round}`
//! ensures only one scheduler instance closes a given round even when several
//! worker processes race the same tick.
//!
//! Grounded on the teacher's `config_watcher.rs` tick-loop style for the
//! lease-expiry sweep, and `funding/service.rs`'s "load, conditionally
//! update, commit" shape for the UPSERT-as-lock pattern.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// An acquired lock. Dropping it without calling [`Locks::release`] just lets
/// the lease expire — there is no `Drop`-based auto-release, since release
/// is an async operation and the lock's owner already knows the key/token it
/// needs to call it with.
#[derive(Debug, Clone, Copy)]
pub struct LockHandle {
    pub token: Uuid,
}

#[async_trait]
pub trait Locks: Send + Sync {
    /// Attempts to acquire `key` for `lease`. Fails with `LockBusy` if a
    /// live (non-expired) lease is already held by someone else.
    async fn acquire(&self, key: &str, lease: Duration) -> AppResult<LockHandle>;

    /// Releases `key`, but only if `token` still matches the current holder —
    /// an expired-and-reacquired lock is never released out from under its
    /// new holder.
    async fn release(&self, key: &str, token: Uuid) -> AppResult<()>;
}

/// Runs `body`, holding `key` for the duration, and always releases whether
/// `body` succeeds or fails. A free function rather than a default trait
/// method: a generic method on `Locks` would make it impossible to hold the
/// trait as `Arc<dyn Locks>`, which `BidEngine`/`RoundCloser` need for
/// swapping `InMemoryLocks` in under test.
pub async fn with_lock<L, T, F, Fut>(locks: &L, key: &str, lease: Duration, body: F) -> AppResult<T>
where
    L: Locks + ?Sized,
    F: FnOnce() -> Fut + Send,
    Fut: std::future::Future<Output = AppResult<T>> + Send,
    T: Send,
{
    let handle = locks.acquire(key, lease).await?;
    let result = body().await;
    let _ = locks.release(key, handle.token).await;
    result
}

struct Lease {
    token: Uuid,
    expires_at: chrono::DateTime<Utc>,
}

/// In-memory lock table for single-process deployments and tests.
#[derive(Default)]
pub struct InMemoryLocks {
    leases: DashMap<String, Lease>,
}

impl InMemoryLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Locks for InMemoryLocks {
    async fn acquire(&self, key: &str, lease: Duration) -> AppResult<LockHandle> {
        let now = Utc::now();
        let token = Uuid::new_v4();
        let expires_at = now + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::seconds(30));

        let mut entry = self.leases.entry(key.to_string()).or_insert_with(|| Lease { token, expires_at });
        if entry.expires_at > now && entry.token != token {
            return Err(AppError::LockBusy(key.to_string()));
        }
        entry.token = token;
        entry.expires_at = expires_at;
        Ok(LockHandle { token })
    }

    async fn release(&self, key: &str, token: Uuid) -> AppResult<()> {
        if let Some(entry) = self.leases.get(key) {
            if entry.token == token {
                drop(entry);
                self.leases.remove(key);
            }
        }
        Ok(())
    }
}

/// Postgres-backed lock, for multi-process deployments: one row per key in
/// the `locks` table (SPEC_FULL.md §4.3, `store/schema.rs`), acquired via an
/// `INSERT ... ON CONFLICT` UPSERT that only replaces an expired lease.
pub struct PgLocks {
    pool: sqlx::PgPool,
}

impl PgLocks {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Locks for PgLocks {
    async fn acquire(&self, key: &str, lease: Duration) -> AppResult<LockHandle> {
        let token = Uuid::new_v4();
        let expires_at = Utc::now() + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::seconds(30));

        let row = sqlx::query(
            "INSERT INTO locks (key, holder, expires_at) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE SET holder = $2, expires_at = $3 \
             WHERE locks.expires_at <= now() \
             RETURNING holder",
        )
        .bind(key)
        .bind(token)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        if row.is_none() {
            return Err(AppError::LockBusy(key.to_string()));
        }
        Ok(LockHandle { token })
    }

    async fn release(&self, key: &str, token: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM locks WHERE key = $1 AND holder = $2")
            .bind(key)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub fn bid_lock_key(auction_id: crate::core_types::AuctionId) -> String {
    format!("auction:{auction_id}:bid")
}

pub fn close_lock_key(auction_id: crate::core_types::AuctionId, round_number: u32) -> String {
    format!("auction:{auction_id}:close:r{round_number}")
}
