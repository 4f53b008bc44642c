//! Composition root: wires `PgStore`/`PgLocks`/`InProcessPubSub` together and
//! runs the background workers (`RoundScheduler`, `LeaderboardReconciler`)
//! until a shutdown signal arrives.
//!
//! Grounded on the teacher's `main.rs` top-level wiring shape, adapted from a
//! one-shot CSV batch run to a long-running service: build config, init
//! logging, connect the store, spawn background tasks, wait on
//! `tokio::signal::ctrl_c`, then let every task observe the shared
//! `watch<bool>` shutdown signal before the process exits.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use sealed_round_auction::clock::{Clock, SystemClock};
use sealed_round_auction::config::AppConfig;
use sealed_round_auction::countdown::CountdownTicker;
use sealed_round_auction::leaderboard::LeaderboardIndex;
use sealed_round_auction::locks::PgLocks;
use sealed_round_auction::logging::init_logging;
use sealed_round_auction::pubsub::InProcessPubSub;
use sealed_round_auction::reconciler::LeaderboardReconciler;
use sealed_round_auction::round_closer::RoundCloser;
use sealed_round_auction::scheduler::RoundScheduler;
use sealed_round_auction::service::AuctionService;
use sealed_round_auction::store::{schema, PgStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(AppConfig::from_env());
    init_logging(&config);
    info!("starting auction worker");

    let store = Arc::new(PgStore::connect(&config).await?);
    sqlx::query(schema::CREATE_TABLES).execute(store.pool()).await?;

    let locks = Arc::new(PgLocks::new(store.pool().clone()));
    let leaderboard = Arc::new(LeaderboardIndex::new());
    let pubsub = Arc::new(InProcessPubSub::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let service = AuctionService::new(
        store.clone(),
        locks.clone(),
        leaderboard.clone(),
        pubsub.clone(),
        clock.clone(),
        config.clone(),
    );

    let reconciler = Arc::new(LeaderboardReconciler::new(store.clone(), leaderboard.clone()));
    reconciler.reconcile_all().await?;

    let round_closer = Arc::new(RoundCloser::new(
        store.clone(),
        locks.clone(),
        leaderboard.clone(),
        pubsub.clone(),
        config.close_lock_lease,
    ));
    let scheduler = Arc::new(RoundScheduler::new(
        store.clone(),
        round_closer,
        clock.clone(),
        config.scheduler_tick,
    ));
    let countdown_ticker = Arc::new(CountdownTicker::new(
        store.clone(),
        pubsub.clone(),
        clock.clone(),
        config.countdown_tick,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let scheduler_handle = {
        let scheduler = scheduler.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { scheduler.run(rx).await })
    };
    let reconciler_handle = {
        let reconciler = reconciler.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { reconciler.run(Duration::from_secs(60), rx).await })
    };
    let countdown_handle = {
        let countdown_ticker = countdown_ticker.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { countdown_ticker.run(rx).await })
    };

    // `service` is built but not yet wrapped by a transport layer — attaching
    // HTTP/WS to it is the excluded non-goal this crate stops short of.
    let _ = &service;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, draining background workers");
    shutdown_tx.send(true)?;

    let _ = tokio::join!(scheduler_handle, reconciler_handle, countdown_handle);
    info!("auction worker stopped");
    Ok(())
}
