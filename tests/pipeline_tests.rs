// tests/pipeline_tests.rs
// Holistic tests over the relay library, exercising the pipeline logic that
// does not need a live chain or database:
// 1. Outcome derivation and oracle result strings
// 2. Slip scoring and leaderboard ordering
// 3. Indexer batch-window adaptation
// 4. Pool flag state machine (settled/refunded exclusivity)
// 5. Gas pricing and revert classification on the write path

use alloy::primitives::U256;

// ============================================================================
// OUTCOME DERIVATION — scores in, outcome strings out
// ============================================================================

mod derivation_tests {
    use bitr_relay::results::derive_outcomes;

    /// A 2-1 home win with both teams scoring covers every full-time family.
    #[test]
    fn test_home_win_derivations() {
        let d = derive_outcomes(2, 1, Some(1), Some(1));
        assert_eq!(d.full_time_1x2, "1");
        assert_eq!(d.full_time_ou25, "Over");
        assert_eq!(d.btts, "Yes");
        assert_eq!(d.half_time_1x2.as_deref(), Some("X"));
        assert_eq!(d.half_time_ou25.as_deref(), Some("Under"));
    }

    /// Goalless draw: the all-Under, all-No corner of the space.
    #[test]
    fn test_goalless_draw_derivations() {
        let d = derive_outcomes(0, 0, Some(0), Some(0));
        assert_eq!(d.full_time_1x2, "X");
        assert_eq!(d.full_time_ou25, "Under");
        assert_eq!(d.btts, "No");
    }

    /// Derivations must agree for every score line: "1" iff home>away,
    /// "Over" iff total>2.5.
    #[test]
    fn test_derivations_hold_over_score_grid() {
        for home in 0..6 {
            for away in 0..6 {
                let d = derive_outcomes(home, away, None, None);
                match home.cmp(&away) {
                    std::cmp::Ordering::Greater => assert_eq!(d.full_time_1x2, "1"),
                    std::cmp::Ordering::Less => assert_eq!(d.full_time_1x2, "2"),
                    std::cmp::Ordering::Equal => assert_eq!(d.full_time_1x2, "X"),
                }
                let expected_ou = if home + away > 2 { "Over" } else { "Under" };
                assert_eq!(d.full_time_ou25, expected_ou, "scores {home}-{away}");
            }
        }
    }
}

// ============================================================================
// SLIP EVALUATION — parlay scoring and leaderboard order
// ============================================================================

mod evaluation_tests {
    use super::*;
    use std::collections::HashMap;

    use bitr_relay::db::models::{BetType, Prediction};
    use bitr_relay::oddyssey::evaluator::{rank_order, score_slip, FixtureOutcome};

    const SCALING: u64 = 1000;

    fn outcome(ml: &str, ou: &str) -> FixtureOutcome {
        FixtureOutcome {
            moneyline: Some(ml.to_string()),
            over_under: Some(ou.to_string()),
        }
    }

    fn pick(fixture: i64, bet_type: BetType, sel: &str, odd: u64) -> Prediction {
        Prediction {
            fixture_id: fixture,
            bet_type,
            selection: sel.to_string(),
            selected_odd: odd,
        }
    }

    /// F1 finishes 2-1 ("1", correct at odd 2500); F2 finishes 0-0
    /// ("Under", so the "Over" pick misses). One correct pick at 2500
    /// scores 1000 × 2500 / 1000 = 2500.
    #[test]
    fn test_mixed_slip_scores_single_odd() {
        let mut outcomes = HashMap::new();
        outcomes.insert(1, outcome("1", "Over"));
        outcomes.insert(2, outcome("X", "Under"));

        let predictions = vec![
            pick(1, BetType::Moneyline, "1", 2500),
            pick(2, BetType::OverUnder, "Over", 1800),
        ];

        let (correct, score) = score_slip(&predictions, &outcomes, U256::from(SCALING));
        assert_eq!(correct, 1);
        assert_eq!(score, U256::from(2500u64));
    }

    /// final_score = ∏ oddᵢ / scaling^(k−1) for k correct picks, in integer
    /// arithmetic.
    #[test]
    fn test_score_multiplicativity_property() {
        let odds: [u64; 4] = [2500, 1800, 3200, 1450];
        let mut outcomes = HashMap::new();
        let mut predictions = Vec::new();
        for (i, odd) in odds.iter().enumerate() {
            outcomes.insert(i as i64, outcome("1", "Over"));
            predictions.push(pick(i as i64, BetType::Moneyline, "1", *odd));
        }

        let (correct, score) = score_slip(&predictions, &outcomes, U256::from(SCALING));
        assert_eq!(correct, 4);

        let mut expected = U256::from(SCALING);
        for odd in odds {
            expected = expected * U256::from(odd) / U256::from(SCALING);
        }
        assert_eq!(score, expected);
    }

    /// A ten-leg slip of long odds stays well inside U256.
    #[test]
    fn test_ten_leg_long_odds_no_overflow() {
        let mut outcomes = HashMap::new();
        let mut predictions = Vec::new();
        for i in 0..10i64 {
            outcomes.insert(i, outcome("1", "Over"));
            // 100.0× odds on every leg, the contract's upper bound.
            predictions.push(pick(i, BetType::Moneyline, "1", 100_000));
        }
        let (correct, score) = score_slip(&predictions, &outcomes, U256::from(SCALING));
        assert_eq!(correct, 10);
        // 1000 × 100^10
        let expected: U256 = U256::from(1000u64) * U256::from(100u64).pow(U256::from(10u64));
        assert_eq!(score, expected);
    }

    /// Re-running the evaluator over the same inputs must not change the
    /// result.
    #[test]
    fn test_evaluation_idempotent() {
        let mut outcomes = HashMap::new();
        outcomes.insert(1, outcome("2", "Under"));
        let predictions = vec![pick(1, BetType::Moneyline, "2", 4100)];

        let a = score_slip(&predictions, &outcomes, U256::from(SCALING));
        let b = score_slip(&predictions, &outcomes, U256::from(SCALING));
        assert_eq!(a, b);
        assert_eq!(a.1, U256::from(4100u64));
    }

    /// Leaderboard: score desc, correct desc, placed-at asc.
    #[test]
    fn test_leaderboard_ordering() {
        let mut scored = vec![
            // (slip_id, placed_at, correct_count, final_score)
            (10, 500, 2, U256::from(4000u64)),
            (11, 100, 5, U256::from(12_000u64)),
            (12, 200, 4, U256::from(12_000u64)),
            (13, 50, 5, U256::from(12_000u64)),
            (14, 400, 0, U256::ZERO),
        ];
        rank_order(&mut scored);
        let ids: Vec<i64> = scored.iter().map(|s| s.0).collect();
        assert_eq!(ids, vec![13, 11, 12, 10, 14]);
    }
}

// ============================================================================
// INDEXER — adaptive batch window
// ============================================================================

mod indexer_tests {
    use bitr_relay::config::IndexerConfig;
    use bitr_relay::indexer::AdaptiveBatch;
    use std::time::Duration;

    fn cfg() -> IndexerConfig {
        IndexerConfig {
            batch_initial: 500,
            batch_min: 25,
            batch_max: 500,
            poll_base: Duration::from_secs(45),
            poll_active: Duration::from_secs(10),
            lag_warning_blocks: 1000,
        }
    }

    /// A range rejection on [100000, 100500] halves to 250 blocks; ten
    /// successful windows grow back to 500.
    #[test]
    fn test_shrink_then_regrow() {
        let mut batch = AdaptiveBatch::new(&cfg());
        assert_eq!(batch.size(), 500);

        assert!(batch.shrink());
        assert_eq!(batch.size(), 250);

        for tick in 1..=10 {
            batch.grow();
            assert_eq!(batch.size(), 250 + 25 * tick);
        }
        assert_eq!(batch.size(), 500);
    }

    /// Repeated rejections bottom out at the floor instead of reaching zero.
    #[test]
    fn test_floor_is_sticky() {
        let mut batch = AdaptiveBatch::new(&cfg());
        while batch.shrink() {}
        assert_eq!(batch.size(), 25);
        assert!(!batch.shrink());
        batch.grow();
        assert_eq!(batch.size(), 50);
    }
}

// ============================================================================
// POOL STATE — settled/refunded exclusivity
// ============================================================================

mod pool_state_tests {
    use bitr_relay::db::models::PoolFlags;

    /// `settled ∧ refunded` is unreachable through the flag constructors.
    #[test]
    fn test_settled_refunded_mutual_exclusion() {
        let base = PoolFlags::default();

        let settled = base.with_settled(true).unwrap();
        assert!(settled.settled());
        assert!(settled.creator_side_won());
        assert!(settled.with_refunded().is_err());

        let refunded = base.with_refunded().unwrap();
        assert!(refunded.refunded());
        assert!(refunded.with_settled(false).is_err());
    }

    /// The no-bets refund path: refunded yes, settled no.
    #[test]
    fn test_refund_leaves_settled_clear() {
        let flags = PoolFlags::default().with_refunded().unwrap();
        assert!(flags.refunded());
        assert!(!flags.settled());
    }

    /// Round-trip through the persisted integer keeps every bit.
    #[test]
    fn test_flag_persistence_roundtrip() {
        let flags = PoolFlags::build(true, false, true, true, false).unwrap();
        let restored = PoolFlags::from_raw(flags.raw());
        assert_eq!(restored.settled(), true);
        assert_eq!(restored.creator_side_won(), false);
        assert_eq!(restored.private(), true);
        assert_eq!(restored.uses_bitr(), true);
        assert_eq!(restored.refunded(), false);
    }
}

// ============================================================================
// WRITE PATH — gas pricing and revert taxonomy
// ============================================================================

mod write_path_tests {
    use bitr_relay::error::RevertKind;
    use bitr_relay::tx::{buffered_gas_limit, effective_gas_price, fallback_gas_limit};

    /// Effective price is max(node × 1.10, 20 gwei).
    #[test]
    fn test_gas_price_policy() {
        let twenty_gwei = 20_000_000_000u128;
        assert_eq!(effective_gas_price(0), twenty_gwei);
        assert_eq!(effective_gas_price(10_000_000_000), twenty_gwei);
        assert_eq!(effective_gas_price(30_000_000_000), 33_000_000_000);
    }

    #[test]
    fn test_gas_limit_buffer_and_fallbacks() {
        assert_eq!(buffered_gas_limit(200_000), 240_000);
        assert_eq!(fallback_gas_limit("submitOutcome"), 200_000);
        assert_eq!(fallback_gas_limit("resolveDailyCycle"), 900_000);
    }

    /// Recoverable reverts park; an authorisation mismatch is fatal.
    #[test]
    fn test_revert_taxonomy_routing() {
        for (text, expected) in [
            ("execution reverted: Pool already settled", RevertKind::AlreadySettled),
            ("execution reverted: Outcome already set", RevertKind::OutcomeAlreadyExists),
            ("execution reverted: Event not ended", RevertKind::EventNotEnded),
            ("execution reverted: Outcome not set", RevertKind::OutcomeNotSet),
            ("execution reverted: unauthorized caller", RevertKind::Unauthorized),
        ] {
            assert_eq!(RevertKind::classify(text), expected, "{text}");
        }
        assert!(RevertKind::Unauthorized.is_fatal());
        assert!(!RevertKind::OutcomeNotSet.is_fatal());
    }
}

// ============================================================================
// CONTRACT CODECS — bytes32 strings and indexed-string topics
// ============================================================================

mod codec_tests {
    use alloy::primitives::keccak256;
    use bitr_relay::contracts::{bytes32_to_string, string_to_bytes32};
    use bitr_relay::contracts::registry::indexed_string_topic;

    #[test]
    fn test_metadata_fields_roundtrip() {
        for s in ["Premier League", "football", "1", "Over", ""] {
            let packed = string_to_bytes32(s);
            assert_eq!(bytes32_to_string(&packed), s);
        }
    }

    /// The oracle submitter and the event mirror must agree on the topic a
    /// market id hashes to.
    #[test]
    fn test_market_id_topic_agreement() {
        let market_id = "19391153";
        assert_eq!(indexed_string_topic(market_id), keccak256(market_id.as_bytes()));
    }
}

// ============================================================================
// CYCLE RESOLUTION — cancelled fixtures and result codes
// ============================================================================

mod cycle_tests {
    use bitr_relay::contracts::abi::{moneyline_code, over_under_code};
    use bitr_relay::db::models::FixtureRow;
    use bitr_relay::oddyssey::driver::slot_resolution;

    fn fixture(status: &str, home: Option<i32>, away: Option<i32>, kickoff: i64) -> FixtureRow {
        FixtureRow {
            fixture_id: 99,
            league: "EPL".to_string(),
            home_team: "Chelsea".to_string(),
            away_team: "Arsenal".to_string(),
            kickoff,
            status: status.to_string(),
            home_score: home,
            away_score: away,
            ht_home_score: None,
            ht_away_score: None,
            odds_home: None,
            odds_draw: None,
            odds_away: None,
            odds_over: None,
            odds_under: None,
            outcome_1x2: None,
            outcome_ou25: None,
            outcome_btts: None,
            outcome_ht_1x2: None,
            outcome_ht_ou25: None,
            finished_at: None,
            updated_at: 0,
        }
    }

    /// Nine real results plus one cancelled fixture: the cancelled slot
    /// resolves as not-applicable once two hours past kick-off.
    #[test]
    fn test_cancelled_fixture_resolves_not_applicable_after_grace() {
        let kickoff = 1_700_000_000;
        let cancelled = fixture("cancelled", None, None, kickoff);

        assert!(slot_resolution(&cancelled, kickoff + 7199).is_none());

        let slot = slot_resolution(&cancelled, kickoff + 7200).unwrap();
        assert_eq!(slot.moneyline, moneyline_code::NOT_APPLICABLE);
        assert_eq!(slot.over_under, over_under_code::NOT_APPLICABLE);

        // Meanwhile a finished fixture carries a real result.
        let finished = fixture("finished", Some(3), Some(1), kickoff);
        let slot = slot_resolution(&finished, kickoff + 7200).unwrap();
        assert_eq!(slot.moneyline, moneyline_code::HOME_WIN);
        assert_eq!(slot.over_under, over_under_code::OVER);
    }

    /// An in-play fixture blocks resolution outright.
    #[test]
    fn test_in_play_blocks_resolution() {
        let f = fixture("in_play", Some(1), Some(0), 1_700_000_000);
        assert!(slot_resolution(&f, 1_700_100_000).is_none());
    }
}

// ============================================================================
// SCHEDULING — UTC anchoring
// ============================================================================

mod scheduler_tests {
    use bitr_relay::scheduler::Cadence;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    /// The daily cycle-open task fires at 00:10 UTC regardless of when the
    /// service started.
    #[test]
    fn test_cycle_open_fires_at_utc_time() {
        let cadence = Cadence::DailyAt { hour: 0, minute: 10 };
        let just_before = Utc.with_ymd_and_hms(2026, 8, 5, 0, 9, 30).unwrap();
        assert_eq!(cadence.next_delay(just_before), Duration::from_secs(30));

        let just_after = Utc.with_ymd_and_hms(2026, 8, 5, 0, 10, 30).unwrap();
        let delay = cadence.next_delay(just_after);
        assert_eq!(delay, Duration::from_secs(24 * 3600 - 30));
    }

    /// Results polling tightens inside the 12:00–23:00 UTC match window.
    #[test]
    fn test_results_cadence_window() {
        let cadence = Cadence::Windowed {
            active: Duration::from_secs(300),
            idle: Duration::from_secs(1800),
            start_hour: 12,
            end_hour: 23,
        };
        let afternoon = Utc.with_ymd_and_hms(2026, 8, 5, 15, 0, 0).unwrap();
        assert_eq!(cadence.next_delay(afternoon), Duration::from_secs(300));
        let overnight = Utc.with_ymd_and_hms(2026, 8, 5, 3, 0, 0).unwrap();
        assert_eq!(cadence.next_delay(overnight), Duration::from_secs(1800));
    }
}

// ============================================================================
// ORACLE RESULT STRINGS — pool happy path derivation
// ============================================================================

mod oracle_tests {
    use bitr_relay::db::store::PendingSubmission;
    use bitr_relay::oracle::derive_result;

    /// Pool 42's market 19391153 finishes 2-1: the submitted outcome for a
    /// 1X2 market is "1".
    #[test]
    fn test_pool_happy_path_result_string() {
        let item = PendingSubmission {
            pool_id: 42,
            market_id: "19391153".to_string(),
            outcome_type: "1X2".to_string(),
            fixture_id: 19391153,
            home_score: 2,
            away_score: 1,
            ht_home_score: None,
            ht_away_score: None,
        };
        assert_eq!(derive_result(&item).as_deref(), Some("1"));
    }
}
