//! Database schema, created idempotently at startup.
//!
//! Wei-denominated amounts and final scores are stored as decimal-string
//! TEXT columns (aggregated through `::numeric` casts) so 256-bit values
//! never lose precision. Variable-shape payloads (slip predictions, cycle
//! matches, resolution tuples) are JSONB behind typed codecs in `models`.

use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

const TABLES: &[&str] = &[
    // Mirrored prediction pools. `flags` packs settled / creator-side-won /
    // private / uses-bitr / refunded; see models::PoolFlags.
    "CREATE TABLE IF NOT EXISTS pools (
        pool_id BIGINT PRIMARY KEY,
        creator TEXT NOT NULL,
        odds INTEGER NOT NULL,
        predicted_outcome TEXT NOT NULL,
        result_hash TEXT NOT NULL DEFAULT '',
        creator_stake TEXT NOT NULL,
        total_creator_side_stake TEXT NOT NULL,
        total_bettor_stake TEXT NOT NULL,
        max_bettor_stake TEXT NOT NULL,
        event_start_time BIGINT NOT NULL,
        event_end_time BIGINT NOT NULL,
        betting_end_time BIGINT NOT NULL,
        arbitration_deadline BIGINT NOT NULL,
        oracle_type TEXT NOT NULL,
        market_type INTEGER NOT NULL,
        market_id TEXT NOT NULL,
        flags INTEGER NOT NULL DEFAULT 0,
        settlement_tx TEXT,
        league TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL DEFAULT '',
        region TEXT NOT NULL DEFAULT '',
        home_team TEXT NOT NULL DEFAULT '',
        away_team TEXT NOT NULL DEFAULT '',
        title TEXT NOT NULL DEFAULT '',
        updated_at BIGINT NOT NULL
    )",
    // Immutable wagers; the foreign key makes orphaned bets fail the
    // indexer's window commit.
    "CREATE TABLE IF NOT EXISTS bets (
        transaction_hash TEXT NOT NULL,
        log_index BIGINT NOT NULL,
        pool_id BIGINT NOT NULL REFERENCES pools(pool_id),
        bettor TEXT NOT NULL,
        amount TEXT NOT NULL,
        is_for_outcome BOOLEAN NOT NULL,
        block_number BIGINT NOT NULL,
        PRIMARY KEY (transaction_hash, log_index)
    )",
    // Raw event journal; the primary key is the exactly-once guard.
    "CREATE TABLE IF NOT EXISTS chain_events (
        block_number BIGINT NOT NULL,
        transaction_hash TEXT NOT NULL,
        log_index BIGINT NOT NULL,
        address TEXT NOT NULL,
        topic0 TEXT NOT NULL,
        PRIMARY KEY (block_number, transaction_hash, log_index)
    )",
    "CREATE TABLE IF NOT EXISTS indexer_cursors (
        stream TEXT PRIMARY KEY,
        last_block BIGINT NOT NULL
    )",
    // External football fixtures and their derived outcomes. Odds are
    // decimal odds scaled by 1000.
    "CREATE TABLE IF NOT EXISTS fixtures (
        fixture_id BIGINT PRIMARY KEY,
        league TEXT NOT NULL DEFAULT '',
        home_team TEXT NOT NULL DEFAULT '',
        away_team TEXT NOT NULL DEFAULT '',
        kickoff BIGINT NOT NULL,
        status TEXT NOT NULL,
        home_score INTEGER,
        away_score INTEGER,
        ht_home_score INTEGER,
        ht_away_score INTEGER,
        odds_home BIGINT,
        odds_draw BIGINT,
        odds_away BIGINT,
        odds_over BIGINT,
        odds_under BIGINT,
        outcome_1x2 TEXT,
        outcome_ou25 TEXT,
        outcome_btts TEXT,
        outcome_ht_1x2 TEXT,
        outcome_ht_ou25 TEXT,
        finished_at BIGINT,
        updated_at BIGINT NOT NULL
    )",
    // Pool ↔ fixture mapping for guided football pools. `market_id_hash` is
    // keccak256(market_id) because the oracle event indexes the string.
    "CREATE TABLE IF NOT EXISTS prediction_markets (
        pool_id BIGINT NOT NULL REFERENCES pools(pool_id),
        market_id TEXT NOT NULL,
        market_id_hash TEXT NOT NULL,
        fixture_id BIGINT NOT NULL,
        outcome_type TEXT NOT NULL,
        predicted_outcome TEXT NOT NULL,
        result TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        PRIMARY KEY (pool_id, market_id)
    )",
    // At-most-once guard for guided-oracle submissions.
    "CREATE TABLE IF NOT EXISTS oracle_submissions (
        market_id TEXT PRIMARY KEY,
        result TEXT NOT NULL,
        transaction_hash TEXT NOT NULL,
        block_number BIGINT NOT NULL,
        submitted_at BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS oddyssey_cycles (
        cycle_id BIGINT PRIMARY KEY,
        state TEXT NOT NULL,
        start_time BIGINT,
        end_time BIGINT,
        matches_data JSONB NOT NULL,
        tx_hash TEXT,
        ready_for_resolution BOOLEAN NOT NULL DEFAULT FALSE,
        resolution_data JSONB,
        resolution_tx TEXT,
        resolved_at BIGINT,
        prize_pool TEXT,
        evaluated BOOLEAN NOT NULL DEFAULT FALSE,
        created_at BIGINT NOT NULL
    )",
    // Daily selection staging: exactly ten slots per cycle date.
    "CREATE TABLE IF NOT EXISTS daily_game_matches (
        cycle_date TEXT NOT NULL,
        slot INTEGER NOT NULL,
        fixture_id BIGINT NOT NULL REFERENCES fixtures(fixture_id),
        odds_home BIGINT NOT NULL,
        odds_draw BIGINT NOT NULL,
        odds_away BIGINT NOT NULL,
        odds_over BIGINT NOT NULL,
        odds_under BIGINT NOT NULL,
        kickoff BIGINT NOT NULL,
        PRIMARY KEY (cycle_date, slot)
    )",
    "CREATE TABLE IF NOT EXISTS oddyssey_slips (
        slip_id BIGINT PRIMARY KEY,
        cycle_id BIGINT NOT NULL REFERENCES oddyssey_cycles(cycle_id),
        player TEXT NOT NULL,
        placed_at BIGINT NOT NULL,
        predictions JSONB NOT NULL,
        is_evaluated BOOLEAN NOT NULL DEFAULT FALSE,
        correct_count INTEGER,
        final_score TEXT,
        leaderboard_rank INTEGER,
        prize_claimed BOOLEAN NOT NULL DEFAULT FALSE,
        claim_tx TEXT
    )",
    // Observability journal: reorg depth exceeded, unreconstructable bets,
    // and similar conditions an operator should see but the pipeline
    // tolerates.
    "CREATE TABLE IF NOT EXISTS anomalies (
        id BIGSERIAL PRIMARY KEY,
        component TEXT NOT NULL,
        detail TEXT NOT NULL,
        created_at BIGINT NOT NULL
    )",
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_bets_pool ON bets(pool_id)",
    "CREATE INDEX IF NOT EXISTS idx_pools_market ON pools(market_id)",
    "CREATE INDEX IF NOT EXISTS idx_pools_oracle_type ON pools(oracle_type)",
    "CREATE INDEX IF NOT EXISTS idx_fixtures_status_kickoff ON fixtures(status, kickoff)",
    "CREATE INDEX IF NOT EXISTS idx_markets_hash ON prediction_markets(market_id_hash)",
    "CREATE INDEX IF NOT EXISTS idx_markets_status ON prediction_markets(status)",
    "CREATE INDEX IF NOT EXISTS idx_markets_fixture ON prediction_markets(fixture_id)",
    "CREATE INDEX IF NOT EXISTS idx_slips_cycle ON oddyssey_slips(cycle_id)",
    "CREATE INDEX IF NOT EXISTS idx_slips_unevaluated ON oddyssey_slips(cycle_id) WHERE NOT is_evaluated",
    "CREATE INDEX IF NOT EXISTS idx_cycles_state ON oddyssey_cycles(state)",
    "CREATE INDEX IF NOT EXISTS idx_daily_matches_fixture ON daily_game_matches(fixture_id)",
];

/// Create all tables and indexes. Safe to run on every startup.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    for ddl in TABLES.iter().chain(INDEXES) {
        sqlx::query(ddl).execute(pool).await?;
    }
    info!("[DB] schema ready ({} tables)", TABLES.len());
    Ok(())
}
