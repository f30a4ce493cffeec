//! Daily match selection.
//!
//! Picks exactly the configured number of fixtures (ten) for today's cycle:
//! kick-off inside the cycle window, full odds coverage for both 1X2 and
//! OU2.5, and not already consumed by a previous cycle. League diversity is
//! a preference, not a requirement: when spreading across leagues cannot
//! fill all slots, the remainder is taken in kick-off order. Fewer than ten
//! eligible fixtures aborts the day's selection.

use std::collections::HashMap;

use anyhow::{bail, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::config::OddysseyConfig;
use crate::db::models::FixtureRow;
use crate::db::models::CycleMatch;
use crate::db::{store, Store};

/// Earliest kick-off relative to selection time; keeps betting open for a
/// while before the first match starts.
const MIN_LEAD_SECS: i64 = 3600;
/// Selection window length.
const WINDOW_SECS: i64 = 24 * 3600;
/// Preferred cap per league during the diversity pass.
const PER_LEAGUE_CAP: usize = 2;

pub struct MatchSelector {
    store: Store,
    cfg: OddysseyConfig,
}

impl MatchSelector {
    pub fn new(store: Store, cfg: OddysseyConfig) -> Self {
        Self { store, cfg }
    }

    /// Select and persist today's matches. No-op if today already has a
    /// selection.
    pub async fn select_for_today(&self) -> Result<()> {
        let today = Utc::now().date_naive().to_string();
        if !store::daily_matches(self.store.pool(), &today).await?.is_empty() {
            return Ok(());
        }

        let now = Utc::now().timestamp();
        let candidates = store::eligible_fixtures(
            self.store.pool(),
            now + MIN_LEAD_SECS,
            now + WINDOW_SECS,
            200,
        )
        .await?;

        let want = self.cfg.match_count;
        if candidates.len() < want {
            warn!(
                "[ODDYSSEY] only {} eligible fixtures (need {}), aborting today's selection",
                candidates.len(),
                want
            );
            bail!("insufficient eligible fixtures for cycle selection");
        }

        let picked = pick_with_diversity(&candidates, want);
        let matches: Vec<CycleMatch> = picked
            .iter()
            .map(|f| CycleMatch {
                fixture_id: f.fixture_id,
                kickoff: f.kickoff,
                // Eligibility guarantees all five odds are present.
                odds_home: f.odds_home.unwrap_or_default() as u64,
                odds_draw: f.odds_draw.unwrap_or_default() as u64,
                odds_away: f.odds_away.unwrap_or_default() as u64,
                odds_over: f.odds_over.unwrap_or_default() as u64,
                odds_under: f.odds_under.unwrap_or_default() as u64,
            })
            .collect();

        let mut tx = self.store.begin().await?;
        store::replace_daily_matches(&mut tx, &today, &matches).await?;
        tx.commit().await?;

        info!(
            "[ODDYSSEY] selected {} matches for {} across {} leagues",
            matches.len(),
            today,
            picked.iter().map(|f| f.league.as_str()).collect::<std::collections::HashSet<_>>().len()
        );
        Ok(())
    }
}

/// Two-pass pick: first spread across leagues (at most two per league), then
/// fill remaining slots in kick-off order.
pub fn pick_with_diversity(candidates: &[FixtureRow], want: usize) -> Vec<FixtureRow> {
    let mut picked: Vec<FixtureRow> = Vec::with_capacity(want);
    let mut per_league: HashMap<&str, usize> = HashMap::new();

    for fixture in candidates {
        if picked.len() == want {
            return picked;
        }
        let count = per_league.entry(fixture.league.as_str()).or_insert(0);
        if *count < PER_LEAGUE_CAP {
            *count += 1;
            picked.push(fixture.clone());
        }
    }

    if picked.len() < want {
        for fixture in candidates {
            if picked.len() == want {
                break;
            }
            if picked.iter().all(|p| p.fixture_id != fixture.fixture_id) {
                picked.push(fixture.clone());
            }
        }
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(id: i64, league: &str, kickoff: i64) -> FixtureRow {
        FixtureRow {
            fixture_id: id,
            league: league.to_string(),
            home_team: String::new(),
            away_team: String::new(),
            kickoff,
            status: "scheduled".to_string(),
            home_score: None,
            away_score: None,
            ht_home_score: None,
            ht_away_score: None,
            odds_home: Some(2000),
            odds_draw: Some(3000),
            odds_away: Some(3500),
            odds_over: Some(1900),
            odds_under: Some(1900),
            outcome_1x2: None,
            outcome_ou25: None,
            outcome_btts: None,
            outcome_ht_1x2: None,
            outcome_ht_ou25: None,
            finished_at: None,
            updated_at: 0,
        }
    }

    #[test]
    fn test_diversity_spreads_leagues() {
        // Six EPL fixtures first, then other leagues.
        let mut candidates = Vec::new();
        for i in 0..6 {
            candidates.push(fixture(i, "EPL", 1000 + i));
        }
        for (i, league) in ["LaLiga", "SerieA", "Bundesliga", "Ligue1"].iter().enumerate() {
            candidates.push(fixture(100 + i as i64, league, 2000));
            candidates.push(fixture(200 + i as i64, league, 2100));
        }

        let picked = pick_with_diversity(&candidates, 10);
        assert_eq!(picked.len(), 10);
        let epl = picked.iter().filter(|f| f.league == "EPL").count();
        // Diversity pass caps EPL at two; the rest come from other leagues.
        assert_eq!(epl, 2);
    }

    #[test]
    fn test_fill_pass_when_diversity_cannot_cover() {
        // Only two leagues available: the cap alone yields 4 picks, the fill
        // pass completes the ten from the remainder.
        let mut candidates = Vec::new();
        for i in 0..8 {
            candidates.push(fixture(i, "EPL", 1000 + i));
        }
        for i in 0..8 {
            candidates.push(fixture(100 + i, "LaLiga", 2000 + i));
        }

        let picked = pick_with_diversity(&candidates, 10);
        assert_eq!(picked.len(), 10);
        // No duplicates.
        let mut ids: Vec<i64> = picked.iter().map(|f| f.fixture_id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn test_returns_short_when_pool_too_small() {
        let candidates = vec![fixture(1, "EPL", 1000), fixture(2, "EPL", 1100)];
        let picked = pick_with_diversity(&candidates, 10);
        assert_eq!(picked.len(), 2, "caller aborts on a short selection");
    }
}
