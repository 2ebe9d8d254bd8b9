//! Pre-kickoff feature computation.
//!
//! Every aggregate for a target match is built from completed matches whose
//! kickoff is strictly before the target's kickoff. Standings are additionally
//! scoped to the target's league and season. The target's own post-match fields
//! (score, stats) are never read.

use std::collections::{BTreeSet, HashMap};
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EngineError, InsufficientHistoryError};
use crate::match_data::{self, MarketGroup, MatchRecord};
use crate::odds;
use crate::progress::{CancelToken, Progress, ProgressSink};

/// Bump whenever any computation below changes meaning.
pub const FEATURE_VERSION: &str = "prekickoff-v3";

const PROGRESS_EVERY: usize = 250;

// Sentinels written for cold-start families. Position 0 is outside the
// 1-based table range, so a flagged row can never pass for a real standing.
pub const COLD_START_VALUE: f64 = 0.0;
pub const COLD_START_POSITION: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormSeasonPolicy {
    CarryOver,
    ResetAtSeason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub form_window: usize,
    pub venue_window: usize,
    pub h2h_window: usize,
    pub min_history: usize,
    pub form_season_policy: FormSeasonPolicy,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            form_window: 5,
            venue_window: 5,
            h2h_window: 5,
            min_history: 3,
            form_season_policy: FormSeasonPolicy::CarryOver,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeatureFlag {
    HomeFormColdStart,
    AwayFormColdStart,
    HomeVenueColdStart,
    AwayVenueColdStart,
    HomeStandingColdStart,
    AwayStandingColdStart,
    H2hColdStart,
    ResultMarketUnavailable,
    GoalsMarketUnavailable,
    BttsMarketUnavailable,
    PreMatchMissing,
}

impl FeatureFlag {
    pub fn is_cold_start(self) -> bool {
        matches!(
            self,
            FeatureFlag::HomeFormColdStart
                | FeatureFlag::AwayFormColdStart
                | FeatureFlag::HomeVenueColdStart
                | FeatureFlag::AwayVenueColdStart
                | FeatureFlag::HomeStandingColdStart
                | FeatureFlag::AwayStandingColdStart
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Perspective {
    HomeFixture,
}

macro_rules! feature_set {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Feature {
            $($variant),+
        }

        impl Feature {
            pub const ALL: &'static [Feature] = &[$(Feature::$variant),+];

            pub fn name(self) -> &'static str {
                match self {
                    $(Feature::$variant => $name),+
                }
            }
        }
    };
}

feature_set! {
    HomeFormPpg => "home_form_ppg",
    HomeFormGoalsFor => "home_form_goals_for",
    HomeFormGoalsAgainst => "home_form_goals_against",
    HomeFormGoalDiff => "home_form_goal_diff",
    HomeFormXg => "home_form_xg",
    HomeFormMatches => "home_form_matches",
    AwayFormPpg => "away_form_ppg",
    AwayFormGoalsFor => "away_form_goals_for",
    AwayFormGoalsAgainst => "away_form_goals_against",
    AwayFormGoalDiff => "away_form_goal_diff",
    AwayFormXg => "away_form_xg",
    AwayFormMatches => "away_form_matches",
    HomeVenuePpg => "home_venue_ppg",
    HomeVenueGoalsFor => "home_venue_goals_for",
    HomeVenueGoalsAgainst => "home_venue_goals_against",
    HomeVenueMatches => "home_venue_matches",
    AwayVenuePpg => "away_venue_ppg",
    AwayVenueGoalsFor => "away_venue_goals_for",
    AwayVenueGoalsAgainst => "away_venue_goals_against",
    AwayVenueMatches => "away_venue_matches",
    HomePosition => "home_position",
    HomeSeasonPoints => "home_season_points",
    HomeSeasonGd => "home_season_gd",
    HomeSeasonPlayed => "home_season_played",
    AwayPosition => "away_position",
    AwaySeasonPoints => "away_season_points",
    AwaySeasonGd => "away_season_gd",
    AwaySeasonPlayed => "away_season_played",
    H2hHomeWins => "h2h_home_wins",
    H2hDraws => "h2h_draws",
    H2hAwayWins => "h2h_away_wins",
    H2hTotalGoals => "h2h_total_goals",
    H2hMatches => "h2h_matches",
    FormPpgDiff => "form_ppg_diff",
    VenuePpgDiff => "venue_ppg_diff",
    PositionDiff => "position_diff",
    SeasonPointsDiff => "season_points_diff",
    XgDiff => "xg_diff",
    ImpliedHome => "implied_prob_home",
    ImpliedDraw => "implied_prob_draw",
    ImpliedAway => "implied_prob_away",
    ImpliedOver25 => "implied_prob_over_25",
    ImpliedBttsYes => "implied_prob_btts_yes",
    HomePrematchPpg => "home_prematch_ppg",
    AwayPrematchPpg => "away_prematch_ppg",
    HomeOverallPpg => "home_overall_ppg",
    AwayOverallPpg => "away_overall_ppg",
    PrematchPpgDiff => "prematch_ppg_diff",
    HomeXgPrematch => "home_xg_prematch",
    AwayXgPrematch => "away_xg_prematch",
    TotalXgPrematch => "total_xg_prematch",
    XgPrematchDiff => "xg_prematch_diff",
    BttsPotential => "btts_potential",
    O25Potential => "o25_potential",
    O35Potential => "o35_potential",
}

impl Feature {
    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    match_id: u64,
    league_id: u32,
    season_id: u32,
    kickoff_unix: i64,
    perspective: Perspective,
    version: String,
    values: Vec<f64>,
    flags: BTreeSet<FeatureFlag>,
}

impl FeatureVector {
    pub fn match_id(&self) -> u64 {
        self.match_id
    }

    pub fn league_id(&self) -> u32 {
        self.league_id
    }

    pub fn season_id(&self) -> u32 {
        self.season_id
    }

    pub fn kickoff_unix(&self) -> i64 {
        self.kickoff_unix
    }

    pub fn perspective(&self) -> Perspective {
        self.perspective
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.values
            .get(feature.index())
            .copied()
            .unwrap_or(f64::NAN)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn flags(&self) -> &BTreeSet<FeatureFlag> {
        &self.flags
    }

    pub fn has_flag(&self, flag: FeatureFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_cold_start(&self) -> bool {
        self.flags.iter().any(|f| f.is_cold_start())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub version: String,
    pub columns: Vec<String>,
    pub rows: Vec<FeatureVector>,
}

impl FeatureTable {
    pub fn row_for(&self, match_id: u64) -> Option<&FeatureVector> {
        self.rows.iter().find(|r| r.match_id == match_id)
    }

    pub fn warm_rows(&self) -> impl Iterator<Item = &FeatureVector> {
        self.rows.iter().filter(|r| !r.is_cold_start())
    }
}

pub fn feature_columns() -> Vec<String> {
    Feature::ALL.iter().map(|f| f.name().to_string()).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct FormAggregate {
    ppg: f64,
    goals_for: f64,
    goals_against: f64,
    xg: f64,
    matches: usize,
}

impl FormAggregate {
    fn goal_diff(&self) -> f64 {
        self.goals_for - self.goals_against
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Standing {
    position: usize,
    points: u32,
    goal_diff: i32,
    played: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct HeadToHead {
    home_wins: usize,
    draws: usize,
    away_wins: usize,
    avg_total_goals: f64,
    matches: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Venue {
    Home,
    Away,
}

// One team's view of a completed history match.
struct TeamLine {
    points: u32,
    goals_for: u32,
    goals_against: u32,
    xg: Option<f64>,
}

fn team_line(m: &MatchRecord, team_id: u32) -> Option<TeamLine> {
    let score = m.score?;
    let (home_pts, away_pts) = score.points();
    if m.home_team_id == team_id {
        Some(TeamLine {
            points: home_pts,
            goals_for: score.home_goals as u32,
            goals_against: score.away_goals as u32,
            xg: m.stats.home_xg,
        })
    } else if m.away_team_id == team_id {
        Some(TeamLine {
            points: away_pts,
            goals_for: score.away_goals as u32,
            goals_against: score.home_goals as u32,
            xg: m.stats.away_xg,
        })
    } else {
        None
    }
}

fn pair_key(a: u32, b: u32) -> (u32, u32) {
    if a <= b { (a, b) } else { (b, a) }
}

pub struct FeatureEngine {
    cfg: FeatureConfig,
    matches: Vec<MatchRecord>,
    by_team: HashMap<u32, Vec<usize>>,
    by_season: HashMap<(u32, u32), Vec<usize>>,
    by_pair: HashMap<(u32, u32), Vec<usize>>,
}

impl FeatureEngine {
    pub fn new(mut matches: Vec<MatchRecord>, cfg: FeatureConfig) -> Self {
        let dropped = match_data::drop_repeated_ids(&mut matches);
        if dropped > 0 {
            warn!(dropped, "feature input repeated match ids; kept first occurrence");
        }
        if !match_data::sort_chronologically(&mut matches) {
            warn!(
                rows = matches.len(),
                "feature input was not in kickoff order; sorted before windowing"
            );
        }

        let mut by_team: HashMap<u32, Vec<usize>> = HashMap::new();
        let mut by_season: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
        let mut by_pair: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
        for (idx, m) in matches.iter().enumerate() {
            if !m.is_completed() {
                continue;
            }
            by_team.entry(m.home_team_id).or_default().push(idx);
            by_team.entry(m.away_team_id).or_default().push(idx);
            by_season
                .entry((m.league_id, m.season_id))
                .or_default()
                .push(idx);
            by_pair
                .entry(pair_key(m.home_team_id, m.away_team_id))
                .or_default()
                .push(idx);
        }

        Self {
            cfg,
            matches,
            by_team,
            by_season,
            by_pair,
        }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.cfg
    }

    pub fn matches(&self) -> &[MatchRecord] {
        &self.matches
    }

    // Indices in `list` whose kickoff is strictly before `cutoff`.
    fn before<'a>(&self, list: &'a [usize], cutoff: i64) -> &'a [usize] {
        let end = list.partition_point(|&i| self.matches[i].kickoff_unix < cutoff);
        &list[..end]
    }

    fn team_history(&self, team_id: u32, cutoff: i64) -> &[usize] {
        self.by_team
            .get(&team_id)
            .map(|list| self.before(list, cutoff))
            .unwrap_or(&[])
    }

    fn aggregate<'a>(
        &'a self,
        team_id: u32,
        lines: impl Iterator<Item = &'a usize>,
        window: usize,
    ) -> Result<FormAggregate, InsufficientHistoryError> {
        let mut points = 0u32;
        let mut goals_for = 0u32;
        let mut goals_against = 0u32;
        let mut xg_sum = 0.0_f64;
        let mut xg_n = 0usize;
        let mut n = 0usize;
        for idx in lines.take(window) {
            let Some(line) = team_line(&self.matches[*idx], team_id) else {
                continue;
            };
            points += line.points;
            goals_for += line.goals_for;
            goals_against += line.goals_against;
            if let Some(xg) = line.xg.filter(|v| v.is_finite()) {
                xg_sum += xg;
                xg_n += 1;
            }
            n += 1;
        }

        let required = self.cfg.min_history.max(1);
        if n < required {
            return Err(InsufficientHistoryError {
                available: n,
                required,
            });
        }
        let nf = n as f64;
        Ok(FormAggregate {
            ppg: points as f64 / nf,
            goals_for: goals_for as f64 / nf,
            goals_against: goals_against as f64 / nf,
            xg: if xg_n > 0 { xg_sum / xg_n as f64 } else { 0.0 },
            matches: n,
        })
    }

    fn form(
        &self,
        team_id: u32,
        target: &MatchRecord,
    ) -> Result<FormAggregate, InsufficientHistoryError> {
        let history = self.team_history(team_id, target.kickoff_unix);
        let lines = history.iter().rev().filter(|&&i| match self.cfg.form_season_policy {
            FormSeasonPolicy::CarryOver => true,
            FormSeasonPolicy::ResetAtSeason => {
                let m = &self.matches[i];
                m.league_id == target.league_id && m.season_id == target.season_id
            }
        });
        self.aggregate(team_id, lines, self.cfg.form_window)
    }

    fn venue_form(
        &self,
        team_id: u32,
        venue: Venue,
        cutoff: i64,
    ) -> Result<FormAggregate, InsufficientHistoryError> {
        let history = self.team_history(team_id, cutoff);
        let lines = history.iter().rev().filter(|&&i| {
            let m = &self.matches[i];
            match venue {
                Venue::Home => m.home_team_id == team_id,
                Venue::Away => m.away_team_id == team_id,
            }
        });
        self.aggregate(team_id, lines, self.cfg.venue_window)
    }

    fn standings(&self, target: &MatchRecord) -> HashMap<u32, Standing> {
        let Some(list) = self.by_season.get(&(target.league_id, target.season_id)) else {
            return HashMap::new();
        };

        let mut table: HashMap<u32, (u32, i32, u32, usize)> = HashMap::new();
        for &idx in self.before(list, target.kickoff_unix) {
            let m = &self.matches[idx];
            let Some(score) = m.score else {
                continue;
            };
            let (hp, ap) = score.points();
            let hg = score.home_goals as i32;
            let ag = score.away_goals as i32;

            let home = table.entry(m.home_team_id).or_default();
            home.0 += hp;
            home.1 += hg - ag;
            home.2 += hg as u32;
            home.3 += 1;

            let away = table.entry(m.away_team_id).or_default();
            away.0 += ap;
            away.1 += ag - hg;
            away.2 += ag as u32;
            away.3 += 1;
        }

        let mut ranked: Vec<(u32, (u32, i32, u32, usize))> = table.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.0
                .cmp(&a.1.0)
                .then(b.1.1.cmp(&a.1.1))
                .then(b.1.2.cmp(&a.1.2))
                .then(a.0.cmp(&b.0))
        });

        ranked
            .into_iter()
            .enumerate()
            .map(|(pos, (team, (points, goal_diff, _, played)))| {
                (
                    team,
                    Standing {
                        position: pos + 1,
                        points,
                        goal_diff,
                        played,
                    },
                )
            })
            .collect()
    }

    fn head_to_head(&self, target: &MatchRecord) -> Result<HeadToHead, InsufficientHistoryError> {
        let list = self
            .by_pair
            .get(&pair_key(target.home_team_id, target.away_team_id))
            .map(|list| self.before(list, target.kickoff_unix))
            .unwrap_or(&[]);

        let mut out = HeadToHead::default();
        let mut goals = 0u32;
        for &idx in list.iter().rev().take(self.cfg.h2h_window) {
            let m = &self.matches[idx];
            let Some(line) = team_line(m, target.home_team_id) else {
                continue;
            };
            // Counted from the target home team's side, whichever venue it played at.
            match line.points {
                3 => out.home_wins += 1,
                1 => out.draws += 1,
                _ => out.away_wins += 1,
            }
            goals += line.goals_for + line.goals_against;
            out.matches += 1;
        }
        if out.matches == 0 {
            return Err(InsufficientHistoryError {
                available: 0,
                required: 1,
            });
        }
        out.avg_total_goals = goals as f64 / out.matches as f64;
        Ok(out)
    }

    /// Features for `target` using only data knowable before its kickoff.
    /// `target` need not be part of the engine's history.
    pub fn features_for(&self, target: &MatchRecord) -> FeatureVector {
        let mut values = vec![COLD_START_VALUE; Feature::ALL.len()];
        let mut flags = BTreeSet::new();
        let mut set = |f: Feature, v: f64| values[f.index()] = v;

        let home_form = self.form(target.home_team_id, target);
        let away_form = self.form(target.away_team_id, target);
        let home_form = side_form(home_form, FeatureFlag::HomeFormColdStart, &mut flags);
        let away_form = side_form(away_form, FeatureFlag::AwayFormColdStart, &mut flags);
        write_form(
            &mut set,
            home_form,
            [
                Feature::HomeFormPpg,
                Feature::HomeFormGoalsFor,
                Feature::HomeFormGoalsAgainst,
                Feature::HomeFormGoalDiff,
                Feature::HomeFormXg,
                Feature::HomeFormMatches,
            ],
        );
        write_form(
            &mut set,
            away_form,
            [
                Feature::AwayFormPpg,
                Feature::AwayFormGoalsFor,
                Feature::AwayFormGoalsAgainst,
                Feature::AwayFormGoalDiff,
                Feature::AwayFormXg,
                Feature::AwayFormMatches,
            ],
        );

        // The home side's home record and the away side's away record only.
        let home_venue = self.venue_form(target.home_team_id, Venue::Home, target.kickoff_unix);
        let away_venue = self.venue_form(target.away_team_id, Venue::Away, target.kickoff_unix);
        let home_venue = side_form(home_venue, FeatureFlag::HomeVenueColdStart, &mut flags);
        let away_venue = side_form(away_venue, FeatureFlag::AwayVenueColdStart, &mut flags);
        write_venue(
            &mut set,
            home_venue,
            [
                Feature::HomeVenuePpg,
                Feature::HomeVenueGoalsFor,
                Feature::HomeVenueGoalsAgainst,
                Feature::HomeVenueMatches,
            ],
        );
        write_venue(
            &mut set,
            away_venue,
            [
                Feature::AwayVenuePpg,
                Feature::AwayVenueGoalsFor,
                Feature::AwayVenueGoalsAgainst,
                Feature::AwayVenueMatches,
            ],
        );

        let table = self.standings(target);
        let home_standing = table.get(&target.home_team_id).copied();
        let away_standing = table.get(&target.away_team_id).copied();
        if home_standing.is_none() {
            flags.insert(FeatureFlag::HomeStandingColdStart);
        }
        if away_standing.is_none() {
            flags.insert(FeatureFlag::AwayStandingColdStart);
        }
        write_standing(
            &mut set,
            home_standing,
            [
                Feature::HomePosition,
                Feature::HomeSeasonPoints,
                Feature::HomeSeasonGd,
                Feature::HomeSeasonPlayed,
            ],
        );
        write_standing(
            &mut set,
            away_standing,
            [
                Feature::AwayPosition,
                Feature::AwaySeasonPoints,
                Feature::AwaySeasonGd,
                Feature::AwaySeasonPlayed,
            ],
        );

        match self.head_to_head(target) {
            Ok(h2h) => {
                set(Feature::H2hHomeWins, h2h.home_wins as f64);
                set(Feature::H2hDraws, h2h.draws as f64);
                set(Feature::H2hAwayWins, h2h.away_wins as f64);
                set(Feature::H2hTotalGoals, h2h.avg_total_goals);
                set(Feature::H2hMatches, h2h.matches as f64);
            }
            Err(_) => {
                flags.insert(FeatureFlag::H2hColdStart);
            }
        }

        let diffs = Differentials::compute(
            home_form.as_ref(),
            away_form.as_ref(),
            home_venue.as_ref(),
            away_venue.as_ref(),
            home_standing.as_ref(),
            away_standing.as_ref(),
        );
        set(Feature::FormPpgDiff, diffs.form_ppg);
        set(Feature::VenuePpgDiff, diffs.venue_ppg);
        set(Feature::PositionDiff, diffs.position);
        set(Feature::SeasonPointsDiff, diffs.season_points);
        set(Feature::XgDiff, diffs.xg);

        write_market(&mut set, target, &mut flags);
        write_prematch(&mut set, target, &mut flags);

        FeatureVector {
            match_id: target.match_id,
            league_id: target.league_id,
            season_id: target.season_id,
            kickoff_unix: target.kickoff_unix,
            perspective: Perspective::HomeFixture,
            version: FEATURE_VERSION.to_string(),
            values,
            flags,
        }
    }

    pub fn generate_table(
        &self,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<FeatureTable, EngineError> {
        let total = self.matches.len();
        let done = AtomicUsize::new(0);
        progress.report(Progress::new("features", 0, total));

        let rows: Result<Vec<FeatureVector>, EngineError> = with_feature_pool(|| {
            self.matches
                .par_iter()
                .map(|m| {
                    cancel.check()?;
                    let row = self.features_for(m);
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if n % PROGRESS_EVERY == 0 || n == total {
                        progress.report(Progress::new("features", n, total));
                    }
                    Ok(row)
                })
                .collect()
        });
        let rows = rows?;

        debug!(rows = rows.len(), "feature table generated");
        Ok(FeatureTable {
            version: FEATURE_VERSION.to_string(),
            columns: feature_columns(),
            rows,
        })
    }
}

/// Home-minus-away style differences. Every path that emits these features goes
/// through here, so "positive = home side stronger" holds everywhere.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Differentials {
    pub form_ppg: f64,
    pub venue_ppg: f64,
    pub position: f64,
    pub season_points: f64,
    pub xg: f64,
}

impl Differentials {
    fn compute(
        home_form: Option<&FormAggregate>,
        away_form: Option<&FormAggregate>,
        home_venue: Option<&FormAggregate>,
        away_venue: Option<&FormAggregate>,
        home_standing: Option<&Standing>,
        away_standing: Option<&Standing>,
    ) -> Self {
        let mut out = Differentials::default();
        if let (Some(h), Some(a)) = (home_form, away_form) {
            out.form_ppg = h.ppg - a.ppg;
            out.xg = h.xg - a.xg;
        }
        if let (Some(h), Some(a)) = (home_venue, away_venue) {
            out.venue_ppg = h.ppg - a.ppg;
        }
        if let (Some(h), Some(a)) = (home_standing, away_standing) {
            out.position = position_diff(h.position, a.position);
            out.season_points = h.points as f64 - a.points as f64;
        }
        out
    }
}

pub fn position_diff(home_position: usize, away_position: usize) -> f64 {
    away_position as f64 - home_position as f64
}

fn side_form(
    res: Result<FormAggregate, InsufficientHistoryError>,
    flag: FeatureFlag,
    flags: &mut BTreeSet<FeatureFlag>,
) -> Option<FormAggregate> {
    match res {
        Ok(agg) => Some(agg),
        Err(_) => {
            flags.insert(flag);
            None
        }
    }
}

fn write_form(set: &mut impl FnMut(Feature, f64), agg: Option<FormAggregate>, cols: [Feature; 6]) {
    let Some(agg) = agg else {
        return;
    };
    set(cols[0], agg.ppg);
    set(cols[1], agg.goals_for);
    set(cols[2], agg.goals_against);
    set(cols[3], agg.goal_diff());
    set(cols[4], agg.xg);
    set(cols[5], agg.matches as f64);
}

fn write_venue(set: &mut impl FnMut(Feature, f64), agg: Option<FormAggregate>, cols: [Feature; 4]) {
    let Some(agg) = agg else {
        return;
    };
    set(cols[0], agg.ppg);
    set(cols[1], agg.goals_for);
    set(cols[2], agg.goals_against);
    set(cols[3], agg.matches as f64);
}

fn write_standing(set: &mut impl FnMut(Feature, f64), standing: Option<Standing>, cols: [Feature; 4]) {
    let Some(s) = standing else {
        set(cols[0], COLD_START_POSITION);
        return;
    };
    set(cols[0], s.position as f64);
    set(cols[1], s.points as f64);
    set(cols[2], s.goal_diff as f64);
    set(cols[3], s.played as f64);
}

fn write_market(
    set: &mut impl FnMut(Feature, f64),
    target: &MatchRecord,
    flags: &mut BTreeSet<FeatureFlag>,
) {
    match odds::demargined_group(&target.odds, MarketGroup::MatchResult) {
        Ok(probs) => {
            let cols = [Feature::ImpliedHome, Feature::ImpliedDraw, Feature::ImpliedAway];
            for (col, (_, p)) in cols.into_iter().zip(probs) {
                set(col, p);
            }
        }
        Err(_) => {
            flags.insert(FeatureFlag::ResultMarketUnavailable);
        }
    }
    match odds::demargined_group(&target.odds, MarketGroup::Goals25) {
        Ok(probs) => set(Feature::ImpliedOver25, probs[0].1),
        Err(_) => {
            flags.insert(FeatureFlag::GoalsMarketUnavailable);
        }
    }
    match odds::demargined_group(&target.odds, MarketGroup::Btts) {
        Ok(probs) => set(Feature::ImpliedBttsYes, probs[0].1),
        Err(_) => {
            flags.insert(FeatureFlag::BttsMarketUnavailable);
        }
    }
}

fn write_prematch(
    set: &mut impl FnMut(Feature, f64),
    target: &MatchRecord,
    flags: &mut BTreeSet<FeatureFlag>,
) {
    let p = &target.prematch;
    let passthrough = [
        (Feature::HomePrematchPpg, p.home_ppg),
        (Feature::AwayPrematchPpg, p.away_ppg),
        (Feature::HomeOverallPpg, p.home_overall_ppg),
        (Feature::AwayOverallPpg, p.away_overall_ppg),
        (Feature::HomeXgPrematch, p.home_xg_prematch),
        (Feature::AwayXgPrematch, p.away_xg_prematch),
        (Feature::TotalXgPrematch, p.total_xg_prematch),
        (Feature::BttsPotential, p.btts_potential),
        (Feature::O25Potential, p.o25_potential),
        (Feature::O35Potential, p.o35_potential),
    ];
    let mut missing = false;
    for (col, value) in passthrough {
        match value.filter(|v| v.is_finite()) {
            Some(v) => set(col, v),
            None => missing = true,
        }
    }
    if let (Some(h), Some(a)) = (p.home_ppg, p.away_ppg) {
        set(Feature::PrematchPpgDiff, h - a);
    }
    if let (Some(h), Some(a)) = (p.home_xg_prematch, p.away_xg_prematch) {
        set(Feature::XgPrematchDiff, h - a);
    }
    if missing {
        flags.insert(FeatureFlag::PreMatchMissing);
    }
}

fn with_feature_pool<T>(action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    let threads = feature_parallelism();
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(action),
        Err(_) => action(),
    }
}

fn feature_parallelism() -> usize {
    env::var("MATCHEDGE_FEATURE_THREADS")
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
        .unwrap_or(4)
        .clamp(1, 32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_data::FinalScore;

    fn played(id: u64, season: u32, ts: i64, home: u32, away: u32, hg: u8, ag: u8) -> MatchRecord {
        MatchRecord {
            match_id: id,
            league_id: 1,
            season_id: season,
            kickoff_unix: ts,
            game_week: None,
            home_team_id: home,
            away_team_id: away,
            home_team: format!("T{home}"),
            away_team: format!("T{away}"),
            score: Some(FinalScore {
                home_goals: hg,
                away_goals: ag,
            }),
            stats: Default::default(),
            prematch: Default::default(),
            odds: Default::default(),
        }
    }

    #[test]
    fn feature_names_are_unique() {
        let mut names = feature_columns();
        let n = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), n);
    }

    #[test]
    fn first_match_is_cold_start_with_sentinels() {
        let engine = FeatureEngine::new(vec![played(1, 1, 100, 1, 2, 1, 0)], FeatureConfig::default());
        let fv = engine.features_for(&engine.matches()[0].clone());
        assert!(fv.has_flag(FeatureFlag::HomeFormColdStart));
        assert!(fv.has_flag(FeatureFlag::AwayFormColdStart));
        assert!(fv.has_flag(FeatureFlag::HomeStandingColdStart));
        assert!(fv.has_flag(FeatureFlag::H2hColdStart));
        assert_eq!(fv.get(Feature::HomePosition), COLD_START_POSITION);
        assert_eq!(fv.get(Feature::PositionDiff), 0.0);
        assert!(fv.is_cold_start());
    }

    #[test]
    fn simultaneous_kickoffs_do_not_see_each_other() {
        let rows = vec![
            played(1, 1, 100, 1, 2, 3, 0),
            played(2, 1, 100, 3, 4, 0, 0),
            played(3, 1, 200, 1, 3, 0, 0),
        ];
        let engine = FeatureEngine::new(rows, FeatureConfig::default());
        let fv = engine.features_for(&engine.matches()[1].clone());
        assert!(fv.has_flag(FeatureFlag::HomeStandingColdStart));
        assert!(fv.has_flag(FeatureFlag::AwayStandingColdStart));

        let later = engine.features_for(&engine.matches()[2].clone());
        assert_eq!(later.get(Feature::HomePosition), 1.0);
        assert_eq!(later.get(Feature::AwayPosition), 2.0);
        assert_eq!(later.get(Feature::PositionDiff), 1.0);
    }

    #[test]
    fn h2h_counts_from_target_home_side_across_venues() {
        let rows = vec![
            played(1, 1, 100, 1, 2, 2, 0),
            played(2, 2, 200, 2, 1, 0, 1),
            played(3, 2, 300, 1, 2, 0, 0),
        ];
        let engine = FeatureEngine::new(rows, FeatureConfig::default());
        let fv = engine.features_for(&engine.matches()[2].clone());
        assert_eq!(fv.get(Feature::H2hHomeWins), 2.0);
        assert_eq!(fv.get(Feature::H2hAwayWins), 0.0);
        assert_eq!(fv.get(Feature::H2hMatches), 2.0);
        assert!((fv.get(Feature::H2hTotalGoals) - 1.5).abs() < 1e-12);
    }
}
