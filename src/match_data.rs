use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::calibration::{self, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalScore {
    pub home_goals: u8,
    pub away_goals: u8,
}

impl FinalScore {
    pub fn outcome(&self) -> Outcome {
        calibration::classify_outcome(self.home_goals as i32, self.away_goals as i32)
    }

    pub fn total_goals(&self) -> u32 {
        self.home_goals as u32 + self.away_goals as u32
    }

    pub fn both_scored(&self) -> bool {
        self.home_goals > 0 && self.away_goals > 0
    }

    pub fn points(&self) -> (u32, u32) {
        match self.outcome() {
            Outcome::Home => (3, 0),
            Outcome::Draw => (1, 1),
            Outcome::Away => (0, 3),
        }
    }
}

// Post-match statistics. Never read for the match whose features are being built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchStats {
    pub home_shots: Option<u32>,
    pub away_shots: Option<u32>,
    pub home_shots_on_target: Option<u32>,
    pub away_shots_on_target: Option<u32>,
    pub home_possession: Option<f64>,
    pub away_possession: Option<f64>,
    pub home_corners: Option<u32>,
    pub away_corners: Option<u32>,
    pub home_xg: Option<f64>,
    pub away_xg: Option<f64>,
}

// Supplied by the upstream feed before kickoff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreMatchFields {
    pub home_ppg: Option<f64>,
    pub away_ppg: Option<f64>,
    pub home_overall_ppg: Option<f64>,
    pub away_overall_ppg: Option<f64>,
    pub home_xg_prematch: Option<f64>,
    pub away_xg_prematch: Option<f64>,
    pub total_xg_prematch: Option<f64>,
    pub btts_potential: Option<f64>,
    pub o25_potential: Option<f64>,
    pub o35_potential: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OddsQuote {
    pub home: Option<f64>,
    pub draw: Option<f64>,
    pub away: Option<f64>,
    pub over_25: Option<f64>,
    pub under_25: Option<f64>,
    pub over_15: Option<f64>,
    pub under_15: Option<f64>,
    pub btts_yes: Option<f64>,
    pub btts_no: Option<f64>,
}

impl OddsQuote {
    pub fn price(&self, market: Market) -> Option<f64> {
        match market {
            Market::Home => self.home,
            Market::Draw => self.draw,
            Market::Away => self.away,
            Market::Over25 => self.over_25,
            Market::Under25 => self.under_25,
            Market::Over15 => self.over_15,
            Market::Under15 => self.under_15,
            Market::BttsYes => self.btts_yes,
            Market::BttsNo => self.btts_no,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: u64,
    pub league_id: u32,
    pub season_id: u32,
    pub kickoff_unix: i64,
    #[serde(default)]
    pub game_week: Option<i64>,
    pub home_team_id: u32,
    pub away_team_id: u32,
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub score: Option<FinalScore>,
    #[serde(default)]
    pub stats: MatchStats,
    #[serde(default)]
    pub prematch: PreMatchFields,
    #[serde(default)]
    pub odds: OddsQuote,
}

impl MatchRecord {
    pub fn is_completed(&self) -> bool {
        self.score.is_some()
    }

    pub fn chrono_key(&self) -> (i64, u64) {
        (self.kickoff_unix, self.match_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    pub season_id: u32,
    pub league_id: u32,
    pub label: String,
    #[serde(default)]
    pub start_unix: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MarketGroup {
    MatchResult,
    Goals25,
    Goals15,
    Btts,
}

impl MarketGroup {
    pub fn markets(self) -> &'static [Market] {
        match self {
            MarketGroup::MatchResult => &[Market::Home, Market::Draw, Market::Away],
            MarketGroup::Goals25 => &[Market::Over25, Market::Under25],
            MarketGroup::Goals15 => &[Market::Over15, Market::Under15],
            MarketGroup::Btts => &[Market::BttsYes, Market::BttsNo],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Market {
    Home,
    Draw,
    Away,
    Over25,
    Under25,
    Over15,
    Under15,
    BttsYes,
    BttsNo,
}

impl Market {
    pub const ALL: [Market; 9] = [
        Market::Home,
        Market::Draw,
        Market::Away,
        Market::Over25,
        Market::Under25,
        Market::Over15,
        Market::Under15,
        Market::BttsYes,
        Market::BttsNo,
    ];

    pub fn group(self) -> MarketGroup {
        match self {
            Market::Home | Market::Draw | Market::Away => MarketGroup::MatchResult,
            Market::Over25 | Market::Under25 => MarketGroup::Goals25,
            Market::Over15 | Market::Under15 => MarketGroup::Goals15,
            Market::BttsYes | Market::BttsNo => MarketGroup::Btts,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Market::Home => "Home",
            Market::Draw => "Draw",
            Market::Away => "Away",
            Market::Over25 => "Over 2.5",
            Market::Under25 => "Under 2.5",
            Market::Over15 => "Over 1.5",
            Market::Under15 => "Under 1.5",
            Market::BttsYes => "BTTS Yes",
            Market::BttsNo => "BTTS No",
        }
    }

    pub fn settles_as_win(self, score: &FinalScore) -> bool {
        let total = score.total_goals();
        match self {
            Market::Home => score.outcome() == Outcome::Home,
            Market::Draw => score.outcome() == Outcome::Draw,
            Market::Away => score.outcome() == Outcome::Away,
            Market::Over25 => total >= 3,
            Market::Under25 => total <= 2,
            Market::Over15 => total >= 2,
            Market::Under15 => total <= 1,
            Market::BttsYes => score.both_scored(),
            Market::BttsNo => !score.both_scored(),
        }
    }
}

/// Sorts by kickoff then match id. Returns whether the input was already in order.
pub fn sort_chronologically(matches: &mut [MatchRecord]) -> bool {
    let ordered = matches
        .windows(2)
        .all(|w| w[0].chrono_key() <= w[1].chrono_key());
    if !ordered {
        matches.sort_by_key(|m| m.chrono_key());
    }
    ordered
}

pub fn drop_repeated_ids(matches: &mut Vec<MatchRecord>) -> usize {
    let before = matches.len();
    let mut seen = HashSet::with_capacity(before);
    matches.retain(|m| seen.insert(m.match_id));
    before - matches.len()
}

#[cfg(test)]
mod tests {
    use super::{FinalScore, Market};

    #[test]
    fn markets_settle_from_final_score() {
        let score = FinalScore {
            home_goals: 2,
            away_goals: 1,
        };
        assert!(Market::Home.settles_as_win(&score));
        assert!(!Market::Draw.settles_as_win(&score));
        assert!(Market::Over25.settles_as_win(&score));
        assert!(Market::Over15.settles_as_win(&score));
        assert!(Market::BttsYes.settles_as_win(&score));
        assert!(!Market::BttsNo.settles_as_win(&score));

        let nil = FinalScore {
            home_goals: 0,
            away_goals: 0,
        };
        assert!(Market::Draw.settles_as_win(&nil));
        assert!(Market::Under15.settles_as_win(&nil));
        assert!(Market::Under25.settles_as_win(&nil));
        assert_eq!(nil.points(), (1, 1));
    }
}
