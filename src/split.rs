use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::GuardrailError;
use crate::match_data::MatchRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitConfig {
    pub holdout_seasons_per_league: usize,
    pub min_train_seasons: usize,
    /// Train and evaluate on every season. Results are not representative.
    pub in_sample: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            holdout_seasons_per_league: 1,
            min_train_seasons: 1,
            in_sample: false,
        }
    }
}

impl SplitConfig {
    pub fn mode(&self) -> EvaluationMode {
        if self.in_sample {
            EvaluationMode::InSample
        } else {
            EvaluationMode::OutOfSample {
                holdout_seasons: self.holdout_seasons_per_league,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationMode {
    OutOfSample { holdout_seasons: usize },
    InSample,
}

impl EvaluationMode {
    pub fn is_representative(&self) -> bool {
        matches!(self, EvaluationMode::OutOfSample { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            EvaluationMode::OutOfSample { .. } => "out-of-sample",
            EvaluationMode::InSample => "in-sample (NOT representative)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KickoffRange {
    pub first: i64,
    pub last: i64,
}

impl KickoffRange {
    fn extend(range: Option<Self>, ts: i64) -> Option<Self> {
        Some(match range {
            None => KickoffRange { first: ts, last: ts },
            Some(r) => KickoffRange {
                first: r.first.min(ts),
                last: r.last.max(ts),
            },
        })
    }

    fn merge(a: Option<Self>, b: Self) -> Option<Self> {
        let a = KickoffRange::extend(a, b.first);
        KickoffRange::extend(a, b.last)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonSpan {
    pub season_id: u32,
    pub range: KickoffRange,
    pub matches: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueSplit {
    pub league_id: u32,
    pub train_seasons: Vec<u32>,
    pub holdout_seasons: Vec<u32>,
    pub train_range: Option<KickoffRange>,
    pub holdout_range: Option<KickoffRange>,
}

impl LeagueSplit {
    pub fn is_train(&self, m: &MatchRecord) -> bool {
        m.league_id == self.league_id && self.train_seasons.contains(&m.season_id)
    }

    pub fn is_holdout(&self, m: &MatchRecord) -> bool {
        m.league_id == self.league_id && self.holdout_seasons.contains(&m.season_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitPlan {
    pub mode: EvaluationMode,
    pub leagues: BTreeMap<u32, LeagueSplit>,
    pub failures: Vec<GuardrailError>,
}

impl SplitPlan {
    pub fn league(&self, league_id: u32) -> Option<&LeagueSplit> {
        self.leagues.get(&league_id)
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn ensure_complete(&self) -> Result<(), GuardrailError> {
        match self.failures.first() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

pub fn season_spans(matches: &[MatchRecord], league_id: u32) -> Vec<SeasonSpan> {
    let mut spans: HashMap<u32, (Option<KickoffRange>, usize)> = HashMap::new();
    for m in matches.iter().filter(|m| m.league_id == league_id) {
        let entry = spans.entry(m.season_id).or_default();
        entry.0 = KickoffRange::extend(entry.0, m.kickoff_unix);
        entry.1 += 1;
    }
    let mut out: Vec<SeasonSpan> = spans
        .into_iter()
        .filter_map(|(season_id, (range, matches))| {
            range.map(|range| SeasonSpan {
                season_id,
                range,
                matches,
            })
        })
        .collect();
    out.sort_by_key(|s| (s.range.first, s.season_id));
    out
}

pub fn plan_league(
    matches: &[MatchRecord],
    league_id: u32,
    cfg: &SplitConfig,
) -> Result<LeagueSplit, GuardrailError> {
    let spans = season_spans(matches, league_id);
    if spans.is_empty() {
        return Err(GuardrailError::NoSeasons { league_id });
    }

    if cfg.in_sample {
        let seasons: Vec<u32> = spans.iter().map(|s| s.season_id).collect();
        let range = spans
            .iter()
            .fold(None, |acc, s| KickoffRange::merge(acc, s.range));
        return Ok(LeagueSplit {
            league_id,
            train_seasons: seasons.clone(),
            holdout_seasons: seasons,
            train_range: range,
            holdout_range: range,
        });
    }

    let holdout = cfg.holdout_seasons_per_league.max(1);
    let min_train = cfg.min_train_seasons.max(1);
    let train_count = spans.len().saturating_sub(holdout);
    if train_count < min_train {
        return Err(GuardrailError::InsufficientTrainSeasons {
            league_id,
            available: spans.len(),
            holdout,
            min_train,
        });
    }

    let (train, test) = spans.split_at(train_count);
    let train_range = train
        .iter()
        .fold(None, |acc, s| KickoffRange::merge(acc, s.range));
    let holdout_range = test
        .iter()
        .fold(None, |acc, s| KickoffRange::merge(acc, s.range));

    if let (Some(tr), Some(ho)) = (train_range, holdout_range)
        && tr.last >= ho.first
    {
        return Err(GuardrailError::TemporalOverlap {
            league_id,
            train_max: tr.last,
            holdout_min: ho.first,
        });
    }

    Ok(LeagueSplit {
        league_id,
        train_seasons: train.iter().map(|s| s.season_id).collect(),
        holdout_seasons: test.iter().map(|s| s.season_id).collect(),
        train_range,
        holdout_range,
    })
}

/// Plans the given leagues independently; a rejected league is recorded in
/// `failures` and does not affect the others.
pub fn plan_leagues(matches: &[MatchRecord], league_ids: &[u32], cfg: &SplitConfig) -> SplitPlan {
    let mut plan = SplitPlan {
        mode: cfg.mode(),
        leagues: BTreeMap::new(),
        failures: Vec::new(),
    };
    for &league_id in league_ids {
        match plan_league(matches, league_id, cfg) {
            Ok(split) => {
                debug!(
                    league_id,
                    train = ?split.train_seasons,
                    holdout = ?split.holdout_seasons,
                    "league split planned"
                );
                plan.leagues.insert(league_id, split);
            }
            Err(err) => {
                warn!(league_id, error = %err, "league rejected by split guardrail");
                plan.failures.push(err);
            }
        }
    }
    plan
}

pub fn plan(matches: &[MatchRecord], cfg: &SplitConfig) -> SplitPlan {
    let leagues: BTreeSet<u32> = matches.iter().map(|m| m.league_id).collect();
    let leagues: Vec<u32> = leagues.into_iter().collect();
    plan_leagues(matches, &leagues, cfg)
}
