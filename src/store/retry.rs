//! Bounded-retry helper backing `Store::with_tx`'s "retries on
//! transient-conflict signals up to `MAX_RETRIES_TX`" contract
//! (SPEC_FULL.md §4.1).

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{AppError, AppResult};

/// True for the failure modes a caller should retry the whole transaction
/// body for: Postgres serialization/deadlock errors and our own
/// `VersionMismatch` (optimistic-concurrency loss to a concurrent writer).
pub fn is_transient_conflict(err: &AppError) -> bool {
    match err {
        AppError::VersionMismatch { .. } => true,
        AppError::Store(msg) => {
            // sqlx surfaces Postgres SQLSTATE 40001 (serialization_failure) and
            // 40P01 (deadlock_detected) in its Display text; matching on the
            // code rather than the whole message survives driver upgrades.
            msg.contains("40001") || msg.contains("40P01")
        }
        _ => false,
    }
}

/// Runs `body` up to `max_attempts` times, retrying only on
/// [`is_transient_conflict`] failures with jittered exponential backoff.
/// Surfaces `ConflictExhausted` once the budget runs out instead of the last
/// underlying error, so callers get one stable variant to match on.
pub async fn with_retry<T, F, Fut>(max_attempts: u32, mut body: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match body().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_attempts && is_transient_conflict(&e) => {
                let backoff_ms = 2u64.saturating_pow(attempt.min(6)) * 5;
                let jitter_ms = rand::thread_rng().gen_range(0..=backoff_ms / 2 + 1);
                tokio::time::sleep(Duration::from_millis(backoff_ms + jitter_ms)).await;
                continue;
            }
            Err(e) if is_transient_conflict(&e) => {
                return Err(AppError::ConflictExhausted { attempts: attempt });
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(5, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(AppError::VersionMismatch { entity: "bid".into() })
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_budget_into_conflict_exhausted() {
        let result: AppResult<()> = with_retry(3, || async {
            Err(AppError::VersionMismatch { entity: "bid".into() })
        })
        .await;
        assert!(matches!(result, Err(AppError::ConflictExhausted { attempts: 3 })));
    }

    #[tokio::test]
    async fn non_transient_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: AppResult<()> = with_retry(5, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::NotFound("user".into()))
        })
        .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
