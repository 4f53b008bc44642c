//! `RoundScheduler` (SPEC_FULL.md §4.6): polls for auctions whose current
//! round has run out the clock and hands each to [`RoundCloser`].
//!
//! Grounded on the teacher's `config_watcher.rs` tick loop: a
//! `tokio::time::interval`, one `#[tracing::instrument]`-able unit of work
//! per tick, and a policy of logging and continuing rather than letting one
//! bad auction kill the loop — production schedulers never crash on a single
//! row's bad data.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, instrument};

use crate::clock::Clock;
use crate::round_closer::RoundCloser;
use crate::store::Store;

pub struct RoundScheduler {
    store: Arc<dyn Store>,
    closer: Arc<RoundCloser>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
}

impl RoundScheduler {
    pub fn new(store: Arc<dyn Store>, closer: Arc<RoundCloser>, clock: Arc<dyn Clock>, tick_interval: Duration) -> Self {
        Self { store, closer, clock, tick_interval }
    }

    /// Runs until `shutdown` fires. Intended to be spawned as its own task
    /// from the composition root.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn tick(&self) {
        let now = self.clock.now();
        let due = match self.store.list_due_auctions(now).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "failed to list due auctions");
                return;
            }
        };
        for auction_id in due {
            if let Err(e) = self.closer.close_if_due(auction_id, now).await {
                error!(%auction_id, error = %e, "failed to close round");
            }
        }
    }
}
