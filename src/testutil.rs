//! In-memory wiring for tests (integration tests under `tests/`, and any
//! unit test that wants a full [`crate::service::AuctionService`] rather
//! than hand-rolling its own `Store`/`Locks`/`PubSub` harness).
//!
//! Grounded on the teacher's `test_helpers.rs`-style fixture module: one
//! function that builds a fully wired, in-process stack so tests read as
//! scenarios instead of re-deriving plumbing every time.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::{Clock, MockClock};
use crate::config::AppConfig;
use crate::leaderboard::LeaderboardIndex;
use crate::locks::InMemoryLocks;
use crate::pubsub::InProcessPubSub;
use crate::service::AuctionService;
use crate::store::InMemoryStore;

/// A fully wired, in-memory `AuctionService` plus the collaborators tests
/// need direct access to (e.g. to advance the clock or inspect raw store
/// state).
pub struct TestHarness {
    pub service: AuctionService,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<MockClock>,
    pub config: Arc<AppConfig>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(start: DateTime<Utc>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let locks = Arc::new(InMemoryLocks::new());
        let leaderboard = Arc::new(LeaderboardIndex::new());
        let pubsub = Arc::new(InProcessPubSub::new());
        let clock = Arc::new(MockClock::new(start));
        let config = Arc::new(AppConfig::default());

        let service = AuctionService::new(
            store.clone(),
            locks,
            leaderboard,
            pubsub,
            clock.clone() as Arc<dyn Clock>,
            config.clone(),
        );

        Self { service, store, clock, config }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        self.clock.advance(duration);
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
