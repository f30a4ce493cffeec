//! Scheduled sync between the provider and the fixtures table.
//!
//! Two entry points, both wired into the scheduler: `sync_catalogue` pulls
//! the upcoming-fixture window once a day, `sync_results` polls fixtures
//! that have kicked off until they reach a terminal state. Non-terminal
//! states write nothing beyond the status column.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::db::models::FixtureStatus;
use crate::db::store::{self, FinalResult, FixtureUpsert};
use crate::db::Store;
use crate::flags::SyncFlags;

use super::client::{scale_odd, ApiFixture, SportsApiClient};
use super::outcomes::derive_outcomes;

/// How many days of upcoming fixtures to keep in the catalogue.
const CATALOGUE_DAYS: i64 = 7;
/// Per-tick ceiling on result polls; halved while the indexer is lagging.
const RESULT_POLL_BUDGET: i64 = 100;

pub struct ResultsFetcher {
    client: SportsApiClient,
    store: Store,
    flags: std::sync::Arc<SyncFlags>,
}

impl ResultsFetcher {
    pub fn new(client: SportsApiClient, store: Store, flags: std::sync::Arc<SyncFlags>) -> Self {
        Self { client, store, flags }
    }

    /// Daily catalogue pull: upcoming fixtures with odds for the selection
    /// window.
    pub async fn sync_catalogue(&self) -> Result<()> {
        let today = Utc::now().date_naive();
        let until = today + ChronoDuration::days(CATALOGUE_DAYS);
        let fixtures = self
            .client
            .fixtures_between(&today.to_string(), &until.to_string())
            .await?;

        let mut stored = 0usize;
        for fixture in &fixtures {
            match self.store_catalogue_entry(fixture).await {
                Ok(()) => stored += 1,
                Err(e) => warn!("[RESULTS] failed to store fixture {}: {e:#}", fixture.id),
            }
        }
        info!("[RESULTS] catalogue sync: {} fixtures ({} stored)", fixtures.len(), stored);
        Ok(())
    }

    async fn store_catalogue_entry(&self, fixture: &ApiFixture) -> Result<()> {
        let odds = fixture.odds.as_ref();
        let upsert = FixtureUpsert {
            fixture_id: fixture.id,
            league: fixture.league.clone().unwrap_or_default(),
            home_team: fixture.home_team.clone().unwrap_or_default(),
            away_team: fixture.away_team.clone().unwrap_or_default(),
            kickoff: fixture.starting_at,
            status: FixtureStatus::parse(fixture.normalized_status()),
            odds_home: odds.and_then(|o| o.home).and_then(scale_odd),
            odds_draw: odds.and_then(|o| o.draw).and_then(scale_odd),
            odds_away: odds.and_then(|o| o.away).and_then(scale_odd),
            odds_over: odds.and_then(|o| o.over_25).and_then(scale_odd),
            odds_under: odds.and_then(|o| o.under_25).and_then(scale_odd),
        };
        store::upsert_fixture(self.store.pool(), &upsert).await
    }

    /// Poll every kicked-off, non-terminal fixture and persist final scores
    /// plus derived outcomes once the provider reports a terminal state.
    pub async fn sync_results(&self) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut budget = RESULT_POLL_BUDGET;
        if self.flags.indexer_lagging() {
            // Give the indexer the RPC headroom until it catches up.
            budget /= 2;
        }

        let due = store::fixtures_to_poll(self.store.pool(), now, budget).await?;
        if due.is_empty() {
            return Ok(());
        }

        let mut finished = 0usize;
        for row in &due {
            let fixture = match self.client.fixture(row.fixture_id).await {
                Ok(f) => f,
                Err(e) => {
                    warn!("[RESULTS] fixture {} fetch failed: {e:#}", row.fixture_id);
                    continue;
                }
            };

            let status = FixtureStatus::parse(fixture.normalized_status());
            match status {
                FixtureStatus::Finished => {
                    let Some(scores) = fixture.scores.as_ref() else {
                        // Terminal without scores violates the provider
                        // contract; skip and let the next tick retry.
                        warn!("[RESULTS] fixture {} finished without scores", row.fixture_id);
                        continue;
                    };
                    let derived = derive_outcomes(
                        scores.home,
                        scores.away,
                        scores.ht_home,
                        scores.ht_away,
                    );
                    let result = FinalResult {
                        fixture_id: row.fixture_id,
                        home_score: scores.home,
                        away_score: scores.away,
                        ht_home_score: scores.ht_home,
                        ht_away_score: scores.ht_away,
                        outcome_1x2: derived.full_time_1x2,
                        outcome_ou25: derived.full_time_ou25,
                        outcome_btts: derived.btts,
                        outcome_ht_1x2: derived.half_time_1x2,
                        outcome_ht_ou25: derived.half_time_ou25,
                    };
                    store::record_final_result(self.store.pool(), &result).await?;
                    finished += 1;
                }
                FixtureStatus::Cancelled => {
                    store::mark_fixture_status(self.store.pool(), row.fixture_id, status).await?;
                    info!("[RESULTS] fixture {} cancelled by provider", row.fixture_id);
                }
                // In-play, postponed, or still scheduled: status only.
                other => {
                    if other.as_str() != row.status {
                        store::mark_fixture_status(self.store.pool(), row.fixture_id, other).await?;
                    }
                }
            }
        }

        if finished > 0 {
            info!("[RESULTS] {} fixtures reached final result", finished);
        }
        Ok(())
    }
}
