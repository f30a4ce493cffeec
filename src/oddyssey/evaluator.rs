//! Slip scoring and leaderboard assignment.
//!
//! Scoring is a pure function of the slip's predictions and the cycle's
//! resolved fixtures, re-derived from final scores on every run. The
//! evaluator is idempotent: re-running after a post-hoc result correction
//! overwrites prior evaluations and ranks.
//!
//! Score arithmetic follows the contract: start at the odds-scaling factor
//! (1000), multiply by each correct pick's scaled odd, divide by the factor.
//! Values are `U256` end-to-end and persist as decimal strings.

use std::collections::HashMap;

use alloy::primitives::U256;
use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::OddysseyConfig;
use crate::db::models::{BetType, CycleRow, FixtureStatus, Prediction};
use crate::db::{store, Store};
use crate::results::outcomes::{one_x_two, over_under_25};

/// Resolved outcome of one cycle fixture, as the evaluator sees it.
#[derive(Debug, Clone, Default)]
pub struct FixtureOutcome {
    /// "1" / "X" / "2"; `None` when the fixture never finished.
    pub moneyline: Option<String>,
    /// "Over" / "Under"; `None` when the fixture never finished.
    pub over_under: Option<String>,
}

pub struct SlipEvaluator {
    store: Store,
    cfg: OddysseyConfig,
}

impl SlipEvaluator {
    pub fn new(store: Store, cfg: OddysseyConfig) -> Self {
        Self { store, cfg }
    }

    /// Evaluate every resolved cycle that still has unscored slips.
    pub async fn evaluate_ready(&self) -> Result<()> {
        for cycle in store::cycles_awaiting_evaluation(self.store.pool()).await? {
            if let Err(e) = self.evaluate_cycle(&cycle).await {
                warn!("[ODDYSSEY] evaluation of cycle {} failed: {e:#}", cycle.cycle_id);
            }
        }
        Ok(())
    }

    pub async fn evaluate_cycle(&self, cycle: &CycleRow) -> Result<()> {
        let outcomes = self.load_outcomes(cycle).await?;
        let slips = store::slips_for_cycle(self.store.pool(), cycle.cycle_id).await?;
        if slips.is_empty() {
            store::set_cycle_evaluated(self.store.pool(), cycle.cycle_id).await?;
            info!("[ODDYSSEY] cycle {} had no slips", cycle.cycle_id);
            return Ok(());
        }

        // Score everything first, then persist scores and ranks atomically.
        let scaling = U256::from(self.cfg.odds_scaling);
        let mut scored: Vec<(i64, i64, u32, U256)> = slips
            .iter()
            .map(|slip| {
                let (correct, score) = score_slip(&slip.predictions.0, &outcomes, scaling);
                (slip.slip_id, slip.placed_at, correct, score)
            })
            .collect();
        rank_order(&mut scored);

        let mut tx = self.store.begin().await?;
        for (rank, (slip_id, _, correct, score)) in scored.iter().enumerate() {
            store::write_evaluation(&mut tx, *slip_id, *correct as i32, &score.to_string()).await?;
            store::write_rank(&mut tx, *slip_id, rank as i32 + 1).await?;
        }
        tx.commit().await?;

        store::set_cycle_evaluated(self.store.pool(), cycle.cycle_id).await?;
        info!("[ODDYSSEY] cycle {}: {} slips evaluated", cycle.cycle_id, scored.len());
        Ok(())
    }

    /// Authoritative outcome per fixture, rebuilt from stored scores.
    async fn load_outcomes(&self, cycle: &CycleRow) -> Result<HashMap<i64, FixtureOutcome>> {
        let mut map = HashMap::new();
        for m in &cycle.matches_data.0 {
            let fixture = store::fixture_by_id(self.store.pool(), m.fixture_id)
                .await?
                .with_context(|| format!("cycle fixture {} missing", m.fixture_id))?;
            let outcome = match (fixture.status(), fixture.home_score, fixture.away_score) {
                (FixtureStatus::Finished, Some(home), Some(away)) => FixtureOutcome {
                    moneyline: Some(one_x_two(home, away)),
                    over_under: Some(over_under_25(home, away)),
                },
                // Cancelled (or otherwise unfinished) slots resolve to
                // not-applicable: no pick on them can be correct.
                _ => FixtureOutcome::default(),
            };
            map.insert(m.fixture_id, outcome);
        }
        Ok(map)
    }
}

/// Score one slip: count correct picks and accumulate the multiplicative
/// score. Zero correct picks scores zero.
pub fn score_slip(
    predictions: &[Prediction],
    outcomes: &HashMap<i64, FixtureOutcome>,
    scaling: U256,
) -> (u32, U256) {
    let mut correct = 0u32;
    let mut score = scaling;

    for prediction in predictions {
        let Some(outcome) = outcomes.get(&prediction.fixture_id) else { continue };
        let resolved = match prediction.bet_type {
            BetType::Moneyline => outcome.moneyline.as_deref(),
            BetType::OverUnder => outcome.over_under.as_deref(),
        };
        if resolved == Some(prediction.selection.as_str()) {
            correct += 1;
            score = score * U256::from(prediction.selected_odd) / scaling;
        }
    }

    if correct == 0 {
        return (0, U256::ZERO);
    }
    (correct, score)
}

/// Leaderboard order: final score descending, then correct count descending,
/// then placement time ascending. Entries are `(slip_id, placed_at,
/// correct_count, final_score)`.
pub fn rank_order(scored: &mut [(i64, i64, u32, U256)]) {
    scored.sort_by(|a, b| {
        b.3.cmp(&a.3)
            .then(b.2.cmp(&a.2))
            .then(a.1.cmp(&b.1))
            .then(a.0.cmp(&b.0))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALING: u64 = 1000;

    fn outcomes_for(entries: &[(i64, &str, &str)]) -> HashMap<i64, FixtureOutcome> {
        entries
            .iter()
            .map(|(id, ml, ou)| {
                (
                    *id,
                    FixtureOutcome {
                        moneyline: Some(ml.to_string()),
                        over_under: Some(ou.to_string()),
                    },
                )
            })
            .collect()
    }

    fn pick(fixture_id: i64, bet_type: BetType, selection: &str, odd: u64) -> Prediction {
        Prediction { fixture_id, bet_type, selection: selection.to_string(), selected_odd: odd }
    }

    #[test]
    fn test_single_correct_pick() {
        let outcomes = outcomes_for(&[(1, "1", "Over"), (2, "X", "Under")]);
        let predictions = vec![
            pick(1, BetType::Moneyline, "1", 2500),
            pick(2, BetType::OverUnder, "Over", 1800),
        ];
        let (correct, score) = score_slip(&predictions, &outcomes, U256::from(SCALING));
        assert_eq!(correct, 1);
        // 1000 × 2500 / 1000 = 2500
        assert_eq!(score, U256::from(2500u64));
    }

    #[test]
    fn test_multiplicative_accumulation() {
        let outcomes = outcomes_for(&[(1, "1", "Over"), (2, "2", "Under"), (3, "X", "Over")]);
        let predictions = vec![
            pick(1, BetType::Moneyline, "1", 2500),
            pick(2, BetType::Moneyline, "2", 3000),
            pick(3, BetType::OverUnder, "Over", 1800),
        ];
        let (correct, score) = score_slip(&predictions, &outcomes, U256::from(SCALING));
        assert_eq!(correct, 3);
        // ((1000 × 2500 / 1000) × 3000 / 1000) × 1800 / 1000 = 13_500_000 / 1000
        assert_eq!(score, U256::from(13_500u64));
    }

    #[test]
    fn test_zero_correct_scores_zero() {
        let outcomes = outcomes_for(&[(1, "X", "Under")]);
        let predictions = vec![pick(1, BetType::Moneyline, "1", 9000)];
        let (correct, score) = score_slip(&predictions, &outcomes, U256::from(SCALING));
        assert_eq!(correct, 0);
        assert_eq!(score, U256::ZERO);
    }

    #[test]
    fn test_unresolved_fixture_counts_incorrect() {
        let mut outcomes = outcomes_for(&[(1, "1", "Over")]);
        outcomes.insert(2, FixtureOutcome::default()); // cancelled slot
        let predictions = vec![
            pick(1, BetType::Moneyline, "1", 2000),
            pick(2, BetType::Moneyline, "1", 5000),
        ];
        let (correct, score) = score_slip(&predictions, &outcomes, U256::from(SCALING));
        assert_eq!(correct, 1);
        assert_eq!(score, U256::from(2000u64));
    }

    #[test]
    fn test_bet_type_separates_selections() {
        // "Over" as a moneyline selection must not match the OU outcome.
        let outcomes = outcomes_for(&[(1, "1", "Over")]);
        let predictions = vec![pick(1, BetType::Moneyline, "Over", 2000)];
        let (correct, _) = score_slip(&predictions, &outcomes, U256::from(SCALING));
        assert_eq!(correct, 0);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let outcomes = outcomes_for(&[(1, "2", "Under"), (2, "1", "Over")]);
        let predictions = vec![
            pick(1, BetType::Moneyline, "2", 3200),
            pick(2, BetType::OverUnder, "Over", 1750),
        ];
        let first = score_slip(&predictions, &outcomes, U256::from(SCALING));
        let second = score_slip(&predictions, &outcomes, U256::from(SCALING));
        assert_eq!(first, second);
    }

    #[test]
    fn test_rank_order_tiebreaks() {
        // (slip_id, placed_at, correct, score)
        let mut scored = vec![
            (1, 100, 3, U256::from(5000u64)),
            (2, 50, 2, U256::from(9000u64)),
            (3, 10, 3, U256::from(5000u64)),
            (4, 5, 1, U256::from(9000u64)),
        ];
        rank_order(&mut scored);
        let ids: Vec<i64> = scored.iter().map(|s| s.0).collect();
        // Highest score first; among equal scores more correct picks win;
        // among equal (score, correct) the earlier slip wins.
        assert_eq!(ids, vec![2, 4, 3, 1]);
    }
}
