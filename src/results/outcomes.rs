//! Outcome derivation rules.
//!
//! Pure functions of the final scores; everything downstream (oracle
//! submission, slip evaluation) re-derives from scores instead of trusting a
//! cached outcome string.

/// All derived outcome strings for one finished fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedOutcomes {
    /// "1" home win, "X" draw, "2" away win.
    pub full_time_1x2: String,
    /// "Over" iff total goals > 2.5, else "Under".
    pub full_time_ou25: String,
    /// "Yes" iff both sides scored.
    pub btts: String,
    pub half_time_1x2: Option<String>,
    pub half_time_ou25: Option<String>,
}

pub fn derive_outcomes(
    home: i32,
    away: i32,
    ht_home: Option<i32>,
    ht_away: Option<i32>,
) -> DerivedOutcomes {
    DerivedOutcomes {
        full_time_1x2: one_x_two(home, away),
        full_time_ou25: over_under_25(home, away),
        btts: both_teams_to_score(home, away),
        half_time_1x2: match (ht_home, ht_away) {
            (Some(h), Some(a)) => Some(one_x_two(h, a)),
            _ => None,
        },
        half_time_ou25: match (ht_home, ht_away) {
            (Some(h), Some(a)) => Some(over_under_25(h, a)),
            _ => None,
        },
    }
}

pub fn one_x_two(home: i32, away: i32) -> String {
    if home > away {
        "1"
    } else if away > home {
        "2"
    } else {
        "X"
    }
    .to_string()
}

/// Total goals strictly above 2.5, i.e. three or more.
pub fn over_under_25(home: i32, away: i32) -> String {
    if home + away > 2 { "Over" } else { "Under" }.to_string()
}

pub fn both_teams_to_score(home: i32, away: i32) -> String {
    if home > 0 && away > 0 { "Yes" } else { "No" }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_x_two() {
        assert_eq!(one_x_two(2, 1), "1");
        assert_eq!(one_x_two(0, 3), "2");
        assert_eq!(one_x_two(1, 1), "X");
        assert_eq!(one_x_two(0, 0), "X");
    }

    #[test]
    fn test_over_under_boundary() {
        // 2.5 line: 2 goals is Under, 3 goals is Over.
        assert_eq!(over_under_25(1, 1), "Under");
        assert_eq!(over_under_25(2, 1), "Over");
        assert_eq!(over_under_25(0, 0), "Under");
        assert_eq!(over_under_25(3, 4), "Over");
    }

    #[test]
    fn test_btts() {
        assert_eq!(both_teams_to_score(1, 1), "Yes");
        assert_eq!(both_teams_to_score(2, 0), "No");
        assert_eq!(both_teams_to_score(0, 0), "No");
    }

    #[test]
    fn test_half_time_variants_need_both_scores() {
        let d = derive_outcomes(2, 1, Some(1), Some(0));
        assert_eq!(d.half_time_1x2.as_deref(), Some("1"));
        assert_eq!(d.half_time_ou25.as_deref(), Some("Under"));

        let d = derive_outcomes(2, 1, Some(1), None);
        assert!(d.half_time_1x2.is_none());
        assert!(d.half_time_ou25.is_none());
    }

    #[test]
    fn test_full_derivation() {
        let d = derive_outcomes(2, 1, Some(0), Some(1));
        assert_eq!(d.full_time_1x2, "1");
        assert_eq!(d.full_time_ou25, "Over");
        assert_eq!(d.btts, "Yes");
        assert_eq!(d.half_time_1x2.as_deref(), Some("2"));
        assert_eq!(d.half_time_ou25.as_deref(), Some("Under"));
    }
}
