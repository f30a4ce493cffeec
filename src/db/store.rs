//! Parameterised queries over the relay schema.
//!
//! Convention: functions that take `&PgPool` are standalone reads or
//! single-statement writes; functions that take `&mut PgConnection` are
//! meant to compose into a caller-owned transaction (indexer windows,
//! settlement critical sections). Amount columns are decimal strings and
//! all arithmetic on them happens through `::numeric` casts.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::info;

use crate::config::DbConfig;

use super::models::{
    CycleMatch, CycleRow, CycleState, FixtureRow, FixtureStatus, PoolFlags, PoolRow,
    Prediction, PredictionMarketRow, ResolvedSlot, SlipRow,
};

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect and prepare the schema. Refuses startup if the database is
    /// unreachable.
    pub async fn connect(cfg: &DbConfig) -> Result<Self> {
        let query_timeout_ms = cfg.query_timeout.as_millis();
        let statement_timeout = format!("SET statement_timeout = {query_timeout_ms}");
        let pool = PgPoolOptions::new()
            .max_connections(cfg.pool_max)
            .min_connections(cfg.pool_min)
            .idle_timeout(cfg.idle_timeout)
            .acquire_timeout(Duration::from_secs(10))
            .after_connect(move |conn, _meta| {
                let stmt = statement_timeout.clone();
                Box::pin(async move {
                    sqlx::Executor::execute(&mut *conn, stmt.as_str()).await?;
                    Ok(())
                })
            })
            .connect(&cfg.url)
            .await
            .context("failed to connect to database")?;

        super::schema::migrate(&pool).await?;
        info!("[DB] connected (pool max={} min={})", cfg.pool_max, cfg.pool_min);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Drain the connection pool on shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn now_ts() -> i64 {
    Utc::now().timestamp()
}

// === Indexer cursors & event journal ===

pub async fn load_cursor(pool: &PgPool, stream: &str) -> Result<Option<i64>> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT last_block FROM indexer_cursors WHERE stream = $1")
            .bind(stream)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(b,)| b))
}

pub async fn save_cursor(conn: &mut PgConnection, stream: &str, last_block: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO indexer_cursors (stream, last_block) VALUES ($1, $2)
         ON CONFLICT (stream) DO UPDATE SET last_block = EXCLUDED.last_block",
    )
    .bind(stream)
    .bind(last_block)
    .execute(conn)
    .await?;
    Ok(())
}

/// Journal a log occurrence. Returns `false` when the `(block, tx, index)`
/// key was already present, which tells the caller to skip projection work.
pub async fn record_event(
    conn: &mut PgConnection,
    block_number: i64,
    transaction_hash: &str,
    log_index: i64,
    address: &str,
    topic0: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO chain_events (block_number, transaction_hash, log_index, address, topic0)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT DO NOTHING",
    )
    .bind(block_number)
    .bind(transaction_hash)
    .bind(log_index)
    .bind(address)
    .bind(topic0)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

// === Pools ===

/// Everything needed to materialise a pool row from chain state.
#[derive(Debug, Clone)]
pub struct PoolUpsert {
    pub pool_id: i64,
    pub creator: String,
    pub odds: i32,
    pub predicted_outcome: String,
    pub result_hash: String,
    pub creator_stake: String,
    pub total_creator_side_stake: String,
    pub total_bettor_stake: String,
    pub max_bettor_stake: String,
    pub event_start_time: i64,
    pub event_end_time: i64,
    pub betting_end_time: i64,
    pub arbitration_deadline: i64,
    pub oracle_type: String,
    pub market_type: i32,
    pub market_id: String,
    pub flags: PoolFlags,
    pub league: String,
    pub category: String,
    pub region: String,
    pub home_team: String,
    pub away_team: String,
    pub title: String,
}

pub async fn upsert_pool(conn: &mut PgConnection, p: &PoolUpsert) -> Result<()> {
    sqlx::query(
        "INSERT INTO pools (
            pool_id, creator, odds, predicted_outcome, result_hash,
            creator_stake, total_creator_side_stake, total_bettor_stake, max_bettor_stake,
            event_start_time, event_end_time, betting_end_time, arbitration_deadline,
            oracle_type, market_type, market_id, flags,
            league, category, region, home_team, away_team, title, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24)
        ON CONFLICT (pool_id) DO UPDATE SET
            result_hash = EXCLUDED.result_hash,
            total_creator_side_stake = EXCLUDED.total_creator_side_stake,
            total_bettor_stake = EXCLUDED.total_bettor_stake,
            flags = EXCLUDED.flags,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(p.pool_id)
    .bind(&p.creator)
    .bind(p.odds)
    .bind(&p.predicted_outcome)
    .bind(&p.result_hash)
    .bind(&p.creator_stake)
    .bind(&p.total_creator_side_stake)
    .bind(&p.total_bettor_stake)
    .bind(&p.max_bettor_stake)
    .bind(p.event_start_time)
    .bind(p.event_end_time)
    .bind(p.betting_end_time)
    .bind(p.arbitration_deadline)
    .bind(&p.oracle_type)
    .bind(p.market_type)
    .bind(&p.market_id)
    .bind(p.flags.raw())
    .bind(&p.league)
    .bind(&p.category)
    .bind(&p.region)
    .bind(&p.home_team)
    .bind(&p.away_team)
    .bind(&p.title)
    .bind(now_ts())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn pool_by_id_tx(conn: &mut PgConnection, pool_id: i64) -> Result<Option<PoolRow>> {
    Ok(sqlx::query_as::<_, PoolRow>("SELECT * FROM pools WHERE pool_id = $1")
        .bind(pool_id)
        .fetch_optional(conn)
        .await?)
}

pub async fn max_pool_id(pool: &PgPool) -> Result<Option<i64>> {
    let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(pool_id) FROM pools")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

/// Serialise all mutations for one pool inside the current transaction.
pub async fn lock_pool(conn: &mut PgConnection, pool_id: i64) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(pool_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Insert a bet and bump the pool's bettor-side total in one step. The bet's
/// primary key makes replays no-ops at the journal layer before this runs.
pub async fn apply_bet(
    conn: &mut PgConnection,
    transaction_hash: &str,
    log_index: i64,
    pool_id: i64,
    bettor: &str,
    amount: &str,
    is_for_outcome: bool,
    block_number: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO bets (transaction_hash, log_index, pool_id, bettor, amount, is_for_outcome, block_number)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(transaction_hash)
    .bind(log_index)
    .bind(pool_id)
    .bind(bettor)
    .bind(amount)
    .bind(is_for_outcome)
    .bind(block_number)
    .execute(&mut *conn)
    .await?;

    if is_for_outcome {
        sqlx::query(
            "UPDATE pools SET
                total_bettor_stake = (total_bettor_stake::numeric + $2::numeric)::text,
                updated_at = $3
             WHERE pool_id = $1",
        )
        .bind(pool_id)
        .bind(amount)
        .bind(now_ts())
        .execute(conn)
        .await?;
    }
    Ok(())
}

/// `delta_sign` is +1 for LiquidityAdded, -1 for LiquidityRemoved.
pub async fn adjust_creator_side_stake(
    conn: &mut PgConnection,
    pool_id: i64,
    amount: &str,
    delta_sign: i32,
) -> Result<()> {
    let op = if delta_sign >= 0 { "+" } else { "-" };
    let sql = format!(
        "UPDATE pools SET
            total_creator_side_stake = GREATEST(total_creator_side_stake::numeric {op} $2::numeric, 0)::text,
            updated_at = $3
         WHERE pool_id = $1"
    );
    sqlx::query(&sql)
        .bind(pool_id)
        .bind(amount)
        .bind(now_ts())
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn mark_pool_settled(
    conn: &mut PgConnection,
    pool_id: i64,
    result_hash: &str,
    creator_side_won: bool,
    settlement_tx: &str,
) -> Result<()> {
    let current = pool_by_id_tx(&mut *conn, pool_id)
        .await?
        .with_context(|| format!("settling unknown pool {pool_id}"))?;
    let flags = current.flags().with_settled(creator_side_won)?;
    sqlx::query(
        "UPDATE pools SET flags = $2, result_hash = $3, settlement_tx = $4, updated_at = $5
         WHERE pool_id = $1",
    )
    .bind(pool_id)
    .bind(flags.raw())
    .bind(result_hash)
    .bind(settlement_tx)
    .bind(now_ts())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn mark_pool_refunded(
    conn: &mut PgConnection,
    pool_id: i64,
    refund_tx: Option<&str>,
) -> Result<()> {
    let current = pool_by_id_tx(&mut *conn, pool_id)
        .await?
        .with_context(|| format!("refunding unknown pool {pool_id}"))?;
    let flags = current.flags().with_refunded()?;
    sqlx::query(
        "UPDATE pools SET flags = $2, settlement_tx = COALESCE($3, settlement_tx), updated_at = $4
         WHERE pool_id = $1",
    )
    .bind(pool_id)
    .bind(flags.raw())
    .bind(refund_tx)
    .bind(now_ts())
    .execute(conn)
    .await?;
    Ok(())
}

/// Overwrite the mirrored bettor-side total with the on-chain value.
pub async fn reconcile_bettor_stake(conn: &mut PgConnection, pool_id: i64, value: &str) -> Result<()> {
    sqlx::query("UPDATE pools SET total_bettor_stake = $2, updated_at = $3 WHERE pool_id = $1")
        .bind(pool_id)
        .bind(value)
        .bind(now_ts())
        .execute(conn)
        .await?;
    Ok(())
}

/// Sum of indexed for-outcome bet amounts, as a decimal string.
pub async fn bettor_stake_sum(pool: &PgPool, pool_id: i64) -> Result<String> {
    let row: (String,) = sqlx::query_as(
        "SELECT COALESCE(SUM(amount::numeric), 0)::text FROM bets
         WHERE pool_id = $1 AND is_for_outcome",
    )
    .bind(pool_id)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Every pool that is neither settled nor refunded.
pub async fn open_pools(pool: &PgPool) -> Result<Vec<PoolRow>> {
    Ok(sqlx::query_as::<_, PoolRow>(
        "SELECT * FROM pools WHERE flags & 1 = 0 AND flags & 16 = 0 ORDER BY pool_id",
    )
    .fetch_all(pool)
    .await?)
}

/// Guided pools past their event end that are neither settled nor refunded.
pub async fn unsettled_pools_due(pool: &PgPool, now: i64) -> Result<Vec<PoolRow>> {
    Ok(sqlx::query_as::<_, PoolRow>(
        "SELECT * FROM pools
         WHERE oracle_type = 'GUIDED'
           AND flags & 1 = 0      -- not settled
           AND flags & 16 = 0     -- not refunded
           AND event_end_time <= $1
         ORDER BY pool_id",
    )
    .bind(now)
    .fetch_all(pool)
    .await?)
}

// === Prediction markets ===

pub async fn upsert_prediction_market(
    conn: &mut PgConnection,
    pool_id: i64,
    market_id: &str,
    market_id_hash: &str,
    fixture_id: i64,
    outcome_type: &str,
    predicted_outcome: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO prediction_markets
            (pool_id, market_id, market_id_hash, fixture_id, outcome_type, predicted_outcome)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (pool_id, market_id) DO NOTHING",
    )
    .bind(pool_id)
    .bind(market_id)
    .bind(market_id_hash)
    .bind(fixture_id)
    .bind(outcome_type)
    .bind(predicted_outcome)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn markets_by_hash_tx(
    conn: &mut PgConnection,
    market_id_hash: &str,
) -> Result<Vec<PredictionMarketRow>> {
    Ok(sqlx::query_as::<_, PredictionMarketRow>(
        "SELECT * FROM prediction_markets WHERE market_id_hash = $1",
    )
    .bind(market_id_hash)
    .fetch_all(conn)
    .await?)
}

pub async fn mark_market_resolved(
    conn: &mut PgConnection,
    pool_id: i64,
    market_id: &str,
    result: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE prediction_markets SET result = $3, status = 'resolved'
         WHERE pool_id = $1 AND market_id = $2",
    )
    .bind(pool_id)
    .bind(market_id)
    .bind(result)
    .execute(conn)
    .await?;
    Ok(())
}

/// A pending guided market joined with its finished fixture, ready for
/// oracle submission. Scores come along so the submitter can re-derive the
/// outcome authoritatively.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingSubmission {
    pub pool_id: i64,
    pub market_id: String,
    pub outcome_type: String,
    pub fixture_id: i64,
    pub home_score: i32,
    pub away_score: i32,
    pub ht_home_score: Option<i32>,
    pub ht_away_score: Option<i32>,
}

pub async fn pending_submissions(pool: &PgPool) -> Result<Vec<PendingSubmission>> {
    Ok(sqlx::query_as::<_, PendingSubmission>(
        "SELECT m.pool_id, m.market_id, m.outcome_type, m.fixture_id,
                f.home_score, f.away_score, f.ht_home_score, f.ht_away_score
         FROM prediction_markets m
         JOIN fixtures f ON f.fixture_id = m.fixture_id
         JOIN pools p ON p.pool_id = m.pool_id
         WHERE m.status = 'pending'
           AND f.status = 'finished'
           AND f.home_score IS NOT NULL
           AND f.away_score IS NOT NULL
           AND p.oracle_type = 'GUIDED'
           AND p.flags & 1 = 0
           AND p.flags & 16 = 0
           AND NOT EXISTS (SELECT 1 FROM oracle_submissions s WHERE s.market_id = m.market_id)
         ORDER BY m.fixture_id",
    )
    .fetch_all(pool)
    .await?)
}

// === Oracle submissions ===

pub async fn submission_exists(pool: &PgPool, market_id: &str) -> Result<bool> {
    let row: (bool,) =
        sqlx::query_as("SELECT EXISTS (SELECT 1 FROM oracle_submissions WHERE market_id = $1)")
            .bind(market_id)
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

/// Returns `false` when a submission row already existed: the unique key is
/// the at-most-once guard, so losers of a race simply observe `false`.
pub async fn record_submission(
    pool: &PgPool,
    market_id: &str,
    result: &str,
    transaction_hash: &str,
    block_number: i64,
) -> Result<bool> {
    let outcome = sqlx::query(
        "INSERT INTO oracle_submissions (market_id, result, transaction_hash, block_number, submitted_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (market_id) DO NOTHING",
    )
    .bind(market_id)
    .bind(result)
    .bind(transaction_hash)
    .bind(block_number)
    .bind(now_ts())
    .execute(pool)
    .await?;
    Ok(outcome.rows_affected() > 0)
}

/// Transaction-scoped variant of [`record_submission`], for mirroring
/// submissions observed on-chain inside an indexer window.
pub async fn record_submission_tx(
    conn: &mut PgConnection,
    market_id: &str,
    result: &str,
    transaction_hash: &str,
    block_number: i64,
) -> Result<bool> {
    let outcome = sqlx::query(
        "INSERT INTO oracle_submissions (market_id, result, transaction_hash, block_number, submitted_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (market_id) DO NOTHING",
    )
    .bind(market_id)
    .bind(result)
    .bind(transaction_hash)
    .bind(block_number)
    .bind(now_ts())
    .execute(conn)
    .await?;
    Ok(outcome.rows_affected() > 0)
}

// === Fixtures ===

#[derive(Debug, Clone)]
pub struct FixtureUpsert {
    pub fixture_id: i64,
    pub league: String,
    pub home_team: String,
    pub away_team: String,
    pub kickoff: i64,
    pub status: FixtureStatus,
    pub odds_home: Option<i64>,
    pub odds_draw: Option<i64>,
    pub odds_away: Option<i64>,
    pub odds_over: Option<i64>,
    pub odds_under: Option<i64>,
}

pub async fn upsert_fixture(pool: &PgPool, f: &FixtureUpsert) -> Result<()> {
    sqlx::query(
        "INSERT INTO fixtures (
            fixture_id, league, home_team, away_team, kickoff, status,
            odds_home, odds_draw, odds_away, odds_over, odds_under, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
        ON CONFLICT (fixture_id) DO UPDATE SET
            kickoff = EXCLUDED.kickoff,
            status = CASE WHEN fixtures.status = 'finished' THEN fixtures.status ELSE EXCLUDED.status END,
            odds_home = COALESCE(EXCLUDED.odds_home, fixtures.odds_home),
            odds_draw = COALESCE(EXCLUDED.odds_draw, fixtures.odds_draw),
            odds_away = COALESCE(EXCLUDED.odds_away, fixtures.odds_away),
            odds_over = COALESCE(EXCLUDED.odds_over, fixtures.odds_over),
            odds_under = COALESCE(EXCLUDED.odds_under, fixtures.odds_under),
            updated_at = EXCLUDED.updated_at",
    )
    .bind(f.fixture_id)
    .bind(&f.league)
    .bind(&f.home_team)
    .bind(&f.away_team)
    .bind(f.kickoff)
    .bind(f.status.as_str())
    .bind(f.odds_home)
    .bind(f.odds_draw)
    .bind(f.odds_away)
    .bind(f.odds_over)
    .bind(f.odds_under)
    .bind(now_ts())
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist final scores plus every derived outcome in one statement.
#[derive(Debug, Clone)]
pub struct FinalResult {
    pub fixture_id: i64,
    pub home_score: i32,
    pub away_score: i32,
    pub ht_home_score: Option<i32>,
    pub ht_away_score: Option<i32>,
    pub outcome_1x2: String,
    pub outcome_ou25: String,
    pub outcome_btts: String,
    pub outcome_ht_1x2: Option<String>,
    pub outcome_ht_ou25: Option<String>,
}

pub async fn record_final_result(pool: &PgPool, r: &FinalResult) -> Result<()> {
    sqlx::query(
        "UPDATE fixtures SET
            status = 'finished',
            home_score = $2, away_score = $3,
            ht_home_score = $4, ht_away_score = $5,
            outcome_1x2 = $6, outcome_ou25 = $7, outcome_btts = $8,
            outcome_ht_1x2 = $9, outcome_ht_ou25 = $10,
            finished_at = $11, updated_at = $11
         WHERE fixture_id = $1",
    )
    .bind(r.fixture_id)
    .bind(r.home_score)
    .bind(r.away_score)
    .bind(r.ht_home_score)
    .bind(r.ht_away_score)
    .bind(&r.outcome_1x2)
    .bind(&r.outcome_ou25)
    .bind(&r.outcome_btts)
    .bind(&r.outcome_ht_1x2)
    .bind(&r.outcome_ht_ou25)
    .bind(now_ts())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_fixture_status(pool: &PgPool, fixture_id: i64, status: FixtureStatus) -> Result<()> {
    sqlx::query("UPDATE fixtures SET status = $2, updated_at = $3 WHERE fixture_id = $1")
        .bind(fixture_id)
        .bind(status.as_str())
        .bind(now_ts())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn fixture_by_id(pool: &PgPool, fixture_id: i64) -> Result<Option<FixtureRow>> {
    Ok(sqlx::query_as::<_, FixtureRow>("SELECT * FROM fixtures WHERE fixture_id = $1")
        .bind(fixture_id)
        .fetch_optional(pool)
        .await?)
}

/// Fixtures that have kicked off but are not yet terminal.
pub async fn fixtures_to_poll(pool: &PgPool, now: i64, limit: i64) -> Result<Vec<FixtureRow>> {
    Ok(sqlx::query_as::<_, FixtureRow>(
        "SELECT * FROM fixtures
         WHERE status NOT IN ('finished', 'cancelled') AND kickoff <= $1
         ORDER BY kickoff
         LIMIT $2",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?)
}

/// Candidate fixtures for cycle selection: inside the window, full odds
/// coverage, never used by a previous cycle.
pub async fn eligible_fixtures(
    pool: &PgPool,
    window_start: i64,
    window_end: i64,
    limit: i64,
) -> Result<Vec<FixtureRow>> {
    Ok(sqlx::query_as::<_, FixtureRow>(
        "SELECT * FROM fixtures f
         WHERE f.status = 'scheduled'
           AND f.kickoff > $1 AND f.kickoff <= $2
           AND f.odds_home IS NOT NULL AND f.odds_draw IS NOT NULL AND f.odds_away IS NOT NULL
           AND f.odds_over IS NOT NULL AND f.odds_under IS NOT NULL
           AND NOT EXISTS (SELECT 1 FROM daily_game_matches d WHERE d.fixture_id = f.fixture_id)
         ORDER BY f.kickoff
         LIMIT $3",
    )
    .bind(window_start)
    .bind(window_end)
    .bind(limit)
    .fetch_all(pool)
    .await?)
}

// === Daily selection & cycles ===

pub async fn replace_daily_matches(
    conn: &mut PgConnection,
    cycle_date: &str,
    matches: &[CycleMatch],
) -> Result<()> {
    sqlx::query("DELETE FROM daily_game_matches WHERE cycle_date = $1")
        .bind(cycle_date)
        .execute(&mut *conn)
        .await?;
    for (slot, m) in matches.iter().enumerate() {
        sqlx::query(
            "INSERT INTO daily_game_matches
                (cycle_date, slot, fixture_id, odds_home, odds_draw, odds_away, odds_over, odds_under, kickoff)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(cycle_date)
        .bind(slot as i32)
        .bind(m.fixture_id)
        .bind(m.odds_home as i64)
        .bind(m.odds_draw as i64)
        .bind(m.odds_away as i64)
        .bind(m.odds_over as i64)
        .bind(m.odds_under as i64)
        .bind(m.kickoff)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn daily_matches(pool: &PgPool, cycle_date: &str) -> Result<Vec<CycleMatch>> {
    let rows: Vec<(i64, i64, i64, i64, i64, i64, i64)> = sqlx::query_as(
        "SELECT fixture_id, odds_home, odds_draw, odds_away, odds_over, odds_under, kickoff
         FROM daily_game_matches WHERE cycle_date = $1 ORDER BY slot",
    )
    .bind(cycle_date)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(fixture_id, h, d, a, o, u, kickoff)| CycleMatch {
            fixture_id,
            kickoff,
            odds_home: h as u64,
            odds_draw: d as u64,
            odds_away: a as u64,
            odds_over: o as u64,
            odds_under: u as u64,
        })
        .collect())
}

pub async fn insert_cycle(
    pool: &PgPool,
    cycle_id: i64,
    state: CycleState,
    start_time: i64,
    end_time: i64,
    matches: &[CycleMatch],
    tx_hash: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO oddyssey_cycles (cycle_id, state, start_time, end_time, matches_data, tx_hash, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (cycle_id) DO NOTHING",
    )
    .bind(cycle_id)
    .bind(state.as_str())
    .bind(start_time)
    .bind(end_time)
    .bind(Json(matches.to_vec()))
    .bind(tx_hash)
    .bind(now_ts())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn cycle_by_id(pool: &PgPool, cycle_id: i64) -> Result<Option<CycleRow>> {
    Ok(sqlx::query_as::<_, CycleRow>("SELECT * FROM oddyssey_cycles WHERE cycle_id = $1")
        .bind(cycle_id)
        .fetch_optional(pool)
        .await?)
}

pub async fn active_cycle(pool: &PgPool) -> Result<Option<CycleRow>> {
    Ok(sqlx::query_as::<_, CycleRow>(
        "SELECT * FROM oddyssey_cycles WHERE state = 'Active' ORDER BY cycle_id DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?)
}

pub async fn cycles_in_state(pool: &PgPool, state: CycleState) -> Result<Vec<CycleRow>> {
    Ok(sqlx::query_as::<_, CycleRow>(
        "SELECT * FROM oddyssey_cycles WHERE state = $1 ORDER BY cycle_id",
    )
    .bind(state.as_str())
    .fetch_all(pool)
    .await?)
}

/// Resolved cycles whose slips still need scoring.
pub async fn cycles_awaiting_evaluation(pool: &PgPool) -> Result<Vec<CycleRow>> {
    Ok(sqlx::query_as::<_, CycleRow>(
        "SELECT * FROM oddyssey_cycles WHERE state = 'Resolved' AND NOT evaluated ORDER BY cycle_id",
    )
    .fetch_all(pool)
    .await?)
}

pub async fn set_cycle_state(pool: &PgPool, cycle_id: i64, state: CycleState) -> Result<()> {
    sqlx::query("UPDATE oddyssey_cycles SET state = $2 WHERE cycle_id = $1")
        .bind(cycle_id)
        .bind(state.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_cycle_ready(
    pool: &PgPool,
    cycle_id: i64,
    resolution: &[ResolvedSlot],
) -> Result<()> {
    sqlx::query(
        "UPDATE oddyssey_cycles SET ready_for_resolution = TRUE, resolution_data = $2
         WHERE cycle_id = $1",
    )
    .bind(cycle_id)
    .bind(Json(resolution.to_vec()))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_cycle_resolved(pool: &PgPool, cycle_id: i64, resolution_tx: &str) -> Result<()> {
    sqlx::query(
        "UPDATE oddyssey_cycles SET state = 'Resolved', resolution_tx = $2, resolved_at = $3
         WHERE cycle_id = $1",
    )
    .bind(cycle_id)
    .bind(resolution_tx)
    .bind(now_ts())
    .execute(pool)
    .await?;
    Ok(())
}

/// Mirror a resolution observed on-chain; keeps an existing resolution tx if
/// the driver already recorded one. The prize pool is only knowable from the
/// `CycleResolved` event, so the mirror owns that column.
pub async fn mirror_cycle_resolved(
    conn: &mut PgConnection,
    cycle_id: i64,
    resolution_tx: &str,
    prize_pool: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE oddyssey_cycles SET
            state = 'Resolved',
            resolution_tx = COALESCE(resolution_tx, $2),
            resolved_at = COALESCE(resolved_at, $3),
            prize_pool = $4
         WHERE cycle_id = $1",
    )
    .bind(cycle_id)
    .bind(resolution_tx)
    .bind(now_ts())
    .bind(prize_pool)
    .execute(conn)
    .await?;
    Ok(())
}

/// Mirror an on-chain `SlipEvaluated` event onto the slip row.
pub async fn mirror_slip_evaluation(
    conn: &mut PgConnection,
    slip_id: i64,
    correct_count: i32,
    final_score: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE oddyssey_slips SET is_evaluated = TRUE, correct_count = $2, final_score = $3
         WHERE slip_id = $1",
    )
    .bind(slip_id)
    .bind(correct_count)
    .bind(final_score)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn set_cycle_evaluated(pool: &PgPool, cycle_id: i64) -> Result<()> {
    sqlx::query("UPDATE oddyssey_cycles SET evaluated = TRUE WHERE cycle_id = $1")
        .bind(cycle_id)
        .execute(pool)
        .await?;
    Ok(())
}

// === Slips ===

pub async fn upsert_slip(
    conn: &mut PgConnection,
    slip_id: i64,
    cycle_id: i64,
    player: &str,
    placed_at: i64,
    predictions: &[Prediction],
) -> Result<()> {
    sqlx::query(
        "INSERT INTO oddyssey_slips (slip_id, cycle_id, player, placed_at, predictions)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (slip_id) DO NOTHING",
    )
    .bind(slip_id)
    .bind(cycle_id)
    .bind(player)
    .bind(placed_at)
    .bind(Json(predictions.to_vec()))
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn max_slip_id(pool: &PgPool) -> Result<Option<i64>> {
    let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(slip_id) FROM oddyssey_slips")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

pub async fn slips_for_cycle(pool: &PgPool, cycle_id: i64) -> Result<Vec<SlipRow>> {
    Ok(sqlx::query_as::<_, SlipRow>(
        "SELECT * FROM oddyssey_slips WHERE cycle_id = $1 ORDER BY slip_id",
    )
    .bind(cycle_id)
    .fetch_all(pool)
    .await?)
}

pub async fn write_evaluation(
    conn: &mut PgConnection,
    slip_id: i64,
    correct_count: i32,
    final_score: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE oddyssey_slips SET is_evaluated = TRUE, correct_count = $2, final_score = $3
         WHERE slip_id = $1",
    )
    .bind(slip_id)
    .bind(correct_count)
    .bind(final_score)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn write_rank(conn: &mut PgConnection, slip_id: i64, rank: i32) -> Result<()> {
    sqlx::query("UPDATE oddyssey_slips SET leaderboard_rank = $2 WHERE slip_id = $1")
        .bind(slip_id)
        .bind(rank)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn mark_prize_claimed(
    conn: &mut PgConnection,
    cycle_id: i64,
    player: &str,
    claim_tx: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE oddyssey_slips SET prize_claimed = TRUE, claim_tx = $3
         WHERE cycle_id = $1 AND player = $2",
    )
    .bind(cycle_id)
    .bind(player)
    .bind(claim_tx)
    .execute(conn)
    .await?;
    Ok(())
}

// === Anomalies ===

pub async fn record_anomaly(pool: &PgPool, component: &str, detail: &str) -> Result<()> {
    sqlx::query("INSERT INTO anomalies (component, detail, created_at) VALUES ($1, $2, $3)")
        .bind(component)
        .bind(detail)
        .bind(now_ts())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn record_anomaly_tx(conn: &mut PgConnection, component: &str, detail: &str) -> Result<()> {
    sqlx::query("INSERT INTO anomalies (component, detail, created_at) VALUES ($1, $2, $3)")
        .bind(component)
        .bind(detail)
        .bind(now_ts())
        .execute(conn)
        .await?;
    Ok(())
}
