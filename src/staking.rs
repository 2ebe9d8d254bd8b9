use serde::{Deserialize, Serialize};

use crate::match_data::Market;

// Absorbs representation error in `model - implied` so that an edge equal to
// the threshold on paper is retained.
const EDGE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StakeConfig {
    pub min_odds: f64,
    pub max_odds: f64,
    pub min_edge: f64,
    pub kelly_fraction: f64,
}

impl Default for StakeConfig {
    fn default() -> Self {
        Self {
            min_odds: 1.5,
            max_odds: 8.0,
            min_edge: 0.05,
            kelly_fraction: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetCandidate {
    pub match_id: u64,
    pub league_id: u32,
    pub season_id: u32,
    pub kickoff_unix: i64,
    pub market: Market,
    pub odds: f64,
    pub model_prob: f64,
    pub implied_prob: f64,
    pub edge: f64,
    pub stake_fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rejection {
    OddsOutOfRange,
    EdgeBelowMinimum,
    NonPositiveKelly,
}

#[derive(Debug, Clone, Copy)]
pub struct CandidateInput {
    pub match_id: u64,
    pub league_id: u32,
    pub season_id: u32,
    pub kickoff_unix: i64,
    pub market: Market,
    pub odds: f64,
    pub model_prob: f64,
    pub implied_prob: f64,
}

pub fn edge(model_prob: f64, implied_prob: f64) -> f64 {
    model_prob - implied_prob
}

/// Full Kelly fraction `(p*o - 1) / (o - 1)` for decimal odds `o`.
pub fn full_kelly(model_prob: f64, odds: f64) -> f64 {
    if odds <= 1.0 {
        return 0.0;
    }
    (model_prob * odds - 1.0) / (odds - 1.0)
}

pub fn stake_fraction(model_prob: f64, odds: f64, kelly_fraction: f64) -> Option<f64> {
    let full = full_kelly(model_prob, odds);
    if full <= 0.0 {
        return None;
    }
    Some(full.clamp(0.0, 1.0) * kelly_fraction.max(0.0))
}

pub fn evaluate(input: &CandidateInput, cfg: &StakeConfig) -> Result<BetCandidate, Rejection> {
    if input.odds < cfg.min_odds || input.odds > cfg.max_odds {
        return Err(Rejection::OddsOutOfRange);
    }
    let edge = edge(input.model_prob, input.implied_prob);
    if edge + EDGE_EPSILON < cfg.min_edge {
        return Err(Rejection::EdgeBelowMinimum);
    }
    let Some(stake_fraction) = stake_fraction(input.model_prob, input.odds, cfg.kelly_fraction)
    else {
        return Err(Rejection::NonPositiveKelly);
    };

    Ok(BetCandidate {
        match_id: input.match_id,
        league_id: input.league_id,
        season_id: input.season_id,
        kickoff_unix: input.kickoff_unix,
        market: input.market,
        odds: input.odds,
        model_prob: input.model_prob,
        implied_prob: input.implied_prob,
        edge,
        stake_fraction,
    })
}
