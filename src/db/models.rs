//! Row types and the small value objects that cross component boundaries.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

// === Pool flags ===

/// Packed pool status bits. Persisted as an integer, but component code only
/// ever sees the named accessors; the raw value stays inside this module and
/// the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolFlags(i32);

const FLAG_SETTLED: i32 = 1 << 0;
const FLAG_CREATOR_SIDE_WON: i32 = 1 << 1;
const FLAG_PRIVATE: i32 = 1 << 2;
const FLAG_USES_BITR: i32 = 1 << 3;
const FLAG_REFUNDED: i32 = 1 << 4;

impl PoolFlags {
    pub fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    pub fn settled(self) -> bool {
        self.0 & FLAG_SETTLED != 0
    }

    pub fn creator_side_won(self) -> bool {
        self.0 & FLAG_CREATOR_SIDE_WON != 0
    }

    pub fn private(self) -> bool {
        self.0 & FLAG_PRIVATE != 0
    }

    pub fn uses_bitr(self) -> bool {
        self.0 & FLAG_USES_BITR != 0
    }

    pub fn refunded(self) -> bool {
        self.0 & FLAG_REFUNDED != 0
    }

    /// Settling a refunded pool (or vice versa) is a state-machine violation;
    /// these constructors keep the pair unrepresentable at the write site.
    pub fn with_settled(self, creator_side_won: bool) -> Result<Self, FlagConflict> {
        if self.refunded() {
            return Err(FlagConflict);
        }
        let mut raw = self.0 | FLAG_SETTLED;
        if creator_side_won {
            raw |= FLAG_CREATOR_SIDE_WON;
        } else {
            raw &= !FLAG_CREATOR_SIDE_WON;
        }
        Ok(Self(raw))
    }

    pub fn with_refunded(self) -> Result<Self, FlagConflict> {
        if self.settled() {
            return Err(FlagConflict);
        }
        Ok(Self(self.0 | FLAG_REFUNDED))
    }

    pub fn build(
        settled: bool,
        creator_side_won: bool,
        private: bool,
        uses_bitr: bool,
        refunded: bool,
    ) -> Result<Self, FlagConflict> {
        if settled && refunded {
            return Err(FlagConflict);
        }
        let mut raw = 0;
        if settled {
            raw |= FLAG_SETTLED;
        }
        if creator_side_won {
            raw |= FLAG_CREATOR_SIDE_WON;
        }
        if private {
            raw |= FLAG_PRIVATE;
        }
        if uses_bitr {
            raw |= FLAG_USES_BITR;
        }
        if refunded {
            raw |= FLAG_REFUNDED;
        }
        Ok(Self(raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a pool cannot be both settled and refunded")]
pub struct FlagConflict;

// === Enumerations ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleType {
    Guided,
    Open,
}

impl OracleType {
    pub fn from_code(code: u8) -> Self {
        if code == crate::contracts::abi::ORACLE_TYPE_OPEN {
            OracleType::Open
        } else {
            OracleType::Guided
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OracleType::Guided => "GUIDED",
            OracleType::Open => "OPEN",
        }
    }
}

/// The outcome families a guided football pool can predict on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeType {
    OneXTwo,
    OverUnder25,
    BothTeamsToScore,
    HalfTimeOneXTwo,
    HalfTimeOverUnder,
}

impl OutcomeType {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeType::OneXTwo => "1X2",
            OutcomeType::OverUnder25 => "OU25",
            OutcomeType::BothTeamsToScore => "BTTS",
            OutcomeType::HalfTimeOneXTwo => "HT_1X2",
            OutcomeType::HalfTimeOverUnder => "HT_OU25",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1X2" => Some(OutcomeType::OneXTwo),
            "OU25" => Some(OutcomeType::OverUnder25),
            "BTTS" => Some(OutcomeType::BothTeamsToScore),
            "HT_1X2" => Some(OutcomeType::HalfTimeOneXTwo),
            "HT_OU25" => Some(OutcomeType::HalfTimeOverUnder),
            _ => None,
        }
    }

    /// Infer the outcome family from the predicted-outcome string a pool
    /// creator committed to ("1"/"X"/"2", "Over"/"Under", "Yes"/"No").
    pub fn infer(predicted: &str) -> Option<Self> {
        match predicted.trim() {
            "1" | "X" | "2" => Some(OutcomeType::OneXTwo),
            "Over" | "Under" => Some(OutcomeType::OverUnder25),
            "Yes" | "No" => Some(OutcomeType::BothTeamsToScore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureStatus {
    Scheduled,
    InPlay,
    Finished,
    Cancelled,
    Postponed,
}

impl FixtureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FixtureStatus::Scheduled => "scheduled",
            FixtureStatus::InPlay => "in_play",
            FixtureStatus::Finished => "finished",
            FixtureStatus::Cancelled => "cancelled",
            FixtureStatus::Postponed => "postponed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "in_play" => FixtureStatus::InPlay,
            "finished" => FixtureStatus::Finished,
            "cancelled" => FixtureStatus::Cancelled,
            "postponed" => FixtureStatus::Postponed,
            _ => FixtureStatus::Scheduled,
        }
    }

    /// Terminal states need no further polling.
    pub fn is_terminal(self) -> bool {
        matches!(self, FixtureStatus::Finished | FixtureStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleState {
    NotStarted,
    Active,
    Ended,
    Resolved,
}

impl CycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleState::NotStarted => "NotStarted",
            CycleState::Active => "Active",
            CycleState::Ended => "Ended",
            CycleState::Resolved => "Resolved",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "Active" => CycleState::Active,
            "Ended" => CycleState::Ended,
            "Resolved" => CycleState::Resolved,
            _ => CycleState::NotStarted,
        }
    }
}

// === JSONB payloads ===

/// One of the ten picks on a slip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub fixture_id: i64,
    pub bet_type: BetType,
    /// "1" / "X" / "2" for moneyline, "Over" / "Under" for totals.
    pub selection: String,
    /// Decimal odd scaled by 1000 at slip-placement time.
    pub selected_odd: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetType {
    Moneyline,
    OverUnder,
}

impl BetType {
    pub fn from_code(code: u8) -> Self {
        if code == crate::contracts::abi::BET_TYPE_OVER_UNDER {
            BetType::OverUnder
        } else {
            BetType::Moneyline
        }
    }
}

/// One fixture slot inside a cycle's `matches_data` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleMatch {
    pub fixture_id: i64,
    pub kickoff: i64,
    pub odds_home: u64,
    pub odds_draw: u64,
    pub odds_away: u64,
    pub odds_over: u64,
    pub odds_under: u64,
}

/// One slot of the prepared resolution payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSlot {
    pub fixture_id: i64,
    pub moneyline: u8,
    pub over_under: u8,
}

// === Rows ===

#[derive(Debug, Clone, FromRow)]
pub struct PoolRow {
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
    pub flags: i32,
    pub settlement_tx: Option<String>,
    pub league: String,
    pub category: String,
    pub region: String,
    pub home_team: String,
    pub away_team: String,
    pub title: String,
    pub updated_at: i64,
}

impl PoolRow {
    pub fn flags(&self) -> PoolFlags {
        PoolFlags::from_raw(self.flags)
    }

    pub fn total_bettor_stake_u256(&self) -> U256 {
        parse_u256(&self.total_bettor_stake)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct FixtureRow {
    pub fixture_id: i64,
    pub league: String,
    pub home_team: String,
    pub away_team: String,
    pub kickoff: i64,
    pub status: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub ht_home_score: Option<i32>,
    pub ht_away_score: Option<i32>,
    pub odds_home: Option<i64>,
    pub odds_draw: Option<i64>,
    pub odds_away: Option<i64>,
    pub odds_over: Option<i64>,
    pub odds_under: Option<i64>,
    pub outcome_1x2: Option<String>,
    pub outcome_ou25: Option<String>,
    pub outcome_btts: Option<String>,
    pub outcome_ht_1x2: Option<String>,
    pub outcome_ht_ou25: Option<String>,
    pub finished_at: Option<i64>,
    pub updated_at: i64,
}

impl FixtureRow {
    pub fn status(&self) -> FixtureStatus {
        FixtureStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PredictionMarketRow {
    pub pool_id: i64,
    pub market_id: String,
    pub market_id_hash: String,
    pub fixture_id: i64,
    pub outcome_type: String,
    pub predicted_outcome: String,
    pub result: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct CycleRow {
    pub cycle_id: i64,
    pub state: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub matches_data: Json<Vec<CycleMatch>>,
    pub tx_hash: Option<String>,
    pub ready_for_resolution: bool,
    pub resolution_data: Option<Json<Vec<ResolvedSlot>>>,
    pub resolution_tx: Option<String>,
    pub resolved_at: Option<i64>,
    pub prize_pool: Option<String>,
    pub evaluated: bool,
    pub created_at: i64,
}

impl CycleRow {
    pub fn state(&self) -> CycleState {
        CycleState::parse(&self.state)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SlipRow {
    pub slip_id: i64,
    pub cycle_id: i64,
    pub player: String,
    pub placed_at: i64,
    pub predictions: Json<Vec<Prediction>>,
    pub is_evaluated: bool,
    pub correct_count: Option<i32>,
    pub final_score: Option<String>,
    pub leaderboard_rank: Option<i32>,
    pub prize_claimed: bool,
    pub claim_tx: Option<String>,
}

/// Parse a decimal-string amount column; unparseable data reads as zero
/// rather than poisoning a whole query path.
pub fn parse_u256(s: &str) -> U256 {
    U256::from_str_radix(s.trim(), 10).unwrap_or(U256::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_roundtrip() {
        let f = PoolFlags::build(true, true, false, true, false).unwrap();
        assert!(f.settled());
        assert!(f.creator_side_won());
        assert!(!f.private());
        assert!(f.uses_bitr());
        assert!(!f.refunded());
        assert_eq!(PoolFlags::from_raw(f.raw()), f);
    }

    #[test]
    fn test_settled_and_refunded_unrepresentable() {
        assert!(PoolFlags::build(true, false, false, false, true).is_err());

        let settled = PoolFlags::default().with_settled(false).unwrap();
        assert!(settled.with_refunded().is_err());

        let refunded = PoolFlags::default().with_refunded().unwrap();
        assert!(refunded.with_settled(true).is_err());
    }

    #[test]
    fn test_outcome_type_inference() {
        assert_eq!(OutcomeType::infer("1"), Some(OutcomeType::OneXTwo));
        assert_eq!(OutcomeType::infer("X"), Some(OutcomeType::OneXTwo));
        assert_eq!(OutcomeType::infer("2"), Some(OutcomeType::OneXTwo));
        assert_eq!(OutcomeType::infer("Over"), Some(OutcomeType::OverUnder25));
        assert_eq!(OutcomeType::infer("Under"), Some(OutcomeType::OverUnder25));
        assert_eq!(OutcomeType::infer("Yes"), Some(OutcomeType::BothTeamsToScore));
        assert_eq!(OutcomeType::infer("Chelsea"), None);
    }

    #[test]
    fn test_fixture_status_terminality() {
        assert!(FixtureStatus::Finished.is_terminal());
        assert!(FixtureStatus::Cancelled.is_terminal());
        assert!(!FixtureStatus::Postponed.is_terminal());
        assert!(!FixtureStatus::InPlay.is_terminal());
    }

    #[test]
    fn test_prediction_serde_shape() {
        let p = Prediction {
            fixture_id: 19391153,
            bet_type: BetType::Moneyline,
            selection: "1".to_string(),
            selected_odd: 2500,
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["bet_type"], "MONEYLINE");
        let back: Prediction = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_parse_u256_decimal_strings() {
        assert_eq!(parse_u256("0"), U256::ZERO);
        assert_eq!(parse_u256("1000000000000000000"), U256::from(10u64).pow(U256::from(18u64)));
        assert_eq!(parse_u256("garbage"), U256::ZERO);
    }
}
