//! Postgres schema (SPEC_FULL.md §4.1, §4.9). Nested round/spec/winner shapes
//! are stored as `JSONB` rather than normalized into their own tables — the
//! teacher's `account/repository.rs` normalizes because its rows are queried
//! piecemeal by many endpoints; here the whole `Auction` is always read and
//! written as one unit inside `place_bid`/`close_round`, so JSONB keeps the
//! read/write path to one row per entity without losing queryability (`spec`
//! and `rounds` are still indexable via Postgres's `jsonb_path_ops`).
//!
//! Not executed as a migration anywhere in this crate — `sqlx::migrate!` is
//! the conventional place to run this, left to the deploying application.

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          UUID PRIMARY KEY,
    name        TEXT NOT NULL,
    is_bot      BOOLEAN NOT NULL DEFAULT FALSE,
    avail       BIGINT NOT NULL DEFAULT 0 CHECK (avail >= 0),
    frozen      BIGINT NOT NULL DEFAULT 0 CHECK (frozen >= 0),
    version     BIGINT NOT NULL DEFAULT 0,
    created_at  TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS auctions (
    id              UUID PRIMARY KEY,
    owner           UUID NOT NULL REFERENCES users(id),
    spec            JSONB NOT NULL,
    status          TEXT NOT NULL,
    current_round   INT NOT NULL DEFAULT 0,
    rounds          JSONB NOT NULL DEFAULT '[]',
    past_winners    JSONB NOT NULL DEFAULT '[]',
    arrival_seq     BIGINT NOT NULL DEFAULT 0,
    version         BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS bids (
    id                  UUID PRIMARY KEY,
    auction_id          UUID NOT NULL REFERENCES auctions(id),
    user_id             UUID NOT NULL REFERENCES users(id),
    amount              BIGINT NOT NULL CHECK (amount > 0),
    status              TEXT NOT NULL,
    won_round           INT,
    item_number         INT,
    carried_from_round  INT,
    created_at          TIMESTAMPTZ NOT NULL,
    arrival_seq         BIGINT NOT NULL,
    version             BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_bids_auction_active
    ON bids (auction_id) WHERE status = 'Active';
CREATE UNIQUE INDEX IF NOT EXISTS idx_bids_auction_amount_active
    ON bids (auction_id, amount) WHERE status = 'Active';

CREATE TABLE IF NOT EXISTS transactions (
    id              UUID PRIMARY KEY,
    user_id         UUID NOT NULL REFERENCES users(id),
    kind            TEXT NOT NULL,
    amount          BIGINT NOT NULL,
    balance_before  BIGINT NOT NULL,
    balance_after   BIGINT NOT NULL,
    frozen_before   BIGINT NOT NULL,
    frozen_after    BIGINT NOT NULL,
    auction_id      UUID,
    bid_id          UUID,
    recorded_at     TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id          UUID PRIMARY KEY,
    auction_id  UUID,
    event       JSONB NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL
);

-- Lease-based distributed locks for the bid lock (`auction:{id}:bid`) and the
-- per-round close lock (`auction:{id}:close:r{round}`), SPEC_FULL.md §4.3.
CREATE TABLE IF NOT EXISTS locks (
    key         TEXT PRIMARY KEY,
    holder      UUID NOT NULL,
    expires_at  TIMESTAMPTZ NOT NULL
);
"#;
