//! Walk-forward run: load, featurize, plan, fit per league, score the holdout,
//! select bets and replay them.

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::backtest::{self, BacktestResult};
use crate::calibration::{self, Outcome, Prob3};
use crate::config::EngineConfig;
use crate::error::{EngineError, InvalidOddsError};
use crate::feature_cache::{CacheKey, FeatureCache};
use crate::features::{FEATURE_VERSION, FeatureEngine, FeatureVector};
use crate::match_data::{FinalScore, Market, MatchRecord};
use crate::odds;
use crate::predictor::{FittedModel, OutcomeProbs, Predictor};
use crate::progress::{CancelToken, NoProgress, Progress, ProgressSink};
use crate::report::{Diagnostics, LeagueReport, RunOutcome, RunReport, SweepPoint};
use crate::split::{self, LeagueSplit};
use crate::staking::{self, BetCandidate, CandidateInput, Rejection, StakeConfig};
use crate::store::MatchStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub leagues: Option<Vec<u32>>,
    pub regenerate_features: bool,
}

/// Candidate inputs for every market of `record` with a usable de-margined
/// price and a model probability. Invalid or missing prices are counted.
pub fn market_inputs(
    record: &MatchRecord,
    probs: &OutcomeProbs,
    diag: &mut Diagnostics,
) -> Vec<CandidateInput> {
    let mut out = Vec::new();
    for market in Market::ALL {
        let Some(price) = record.odds.price(market) else {
            diag.missing_odds += 1;
            continue;
        };
        let implied_prob = match odds::implied_for(&record.odds, market) {
            Ok(p) => p,
            Err(InvalidOddsError::Missing) => {
                diag.missing_odds += 1;
                continue;
            }
            Err(err) => {
                diag.invalid_odds += 1;
                warn!(match_id = record.match_id, market = market.label(), error = %err, "invalid odds skipped");
                continue;
            }
        };
        let Some(model_prob) = probs.prob_for(market) else {
            continue;
        };
        out.push(CandidateInput {
            match_id: record.match_id,
            league_id: record.league_id,
            season_id: record.season_id,
            kickoff_unix: record.kickoff_unix,
            market,
            odds: price,
            model_prob,
            implied_prob,
        });
    }
    out
}

pub fn select_candidates(
    inputs: &[CandidateInput],
    cfg: &StakeConfig,
    diag: &mut Diagnostics,
) -> Vec<BetCandidate> {
    let mut out = Vec::new();
    for input in inputs {
        match staking::evaluate(input, cfg) {
            Ok(candidate) => out.push(candidate),
            Err(Rejection::OddsOutOfRange) => diag.rejections.odds_out_of_range += 1,
            Err(Rejection::EdgeBelowMinimum) => diag.rejections.edge_below_minimum += 1,
            Err(Rejection::NonPositiveKelly) => diag.rejections.non_positive_kelly += 1,
        }
    }
    out
}

struct LeagueRun {
    report: LeagueReport,
    inputs: Vec<CandidateInput>,
    predictions: Vec<(Prob3, Outcome)>,
}

fn run_league<P: Predictor>(
    split: &LeagueSplit,
    matches: &[MatchRecord],
    rows: &HashMap<u64, &FeatureVector>,
    predictor: &P,
    cancel: &CancelToken,
) -> Result<LeagueRun, EngineError> {
    let mut diag = Diagnostics::default();
    let mut report = LeagueReport {
        league_id: split.league_id,
        train_seasons: split.train_seasons.clone(),
        holdout_seasons: split.holdout_seasons.clone(),
        train_range: split.train_range,
        holdout_range: split.holdout_range,
        train_rows: 0,
        holdout_rows: 0,
        scored: 0,
        candidates: 0,
        fit_error: None,
        metrics: Default::default(),
        bets: 0,
        staked: 0.0,
        profit: 0.0,
        roi: 0.0,
        diagnostics: Diagnostics::default(),
    };

    let mut train_rows: Vec<&FeatureVector> = Vec::new();
    let mut train_labels: Vec<FinalScore> = Vec::new();
    for m in matches.iter().filter(|m| split.is_train(m)) {
        let (Some(score), Some(row)) = (m.score, rows.get(&m.match_id).copied()) else {
            continue;
        };
        if row.is_cold_start() {
            continue;
        }
        train_rows.push(row);
        train_labels.push(score);
    }
    report.train_rows = train_rows.len();

    let model = match predictor.fit(&train_rows, &train_labels) {
        Ok(model) => model,
        Err(err) => {
            warn!(league_id = split.league_id, error = %err, "predictor fit failed");
            diag.fit_failures += 1;
            report.fit_error = Some(err.to_string());
            report.diagnostics = diag;
            return Ok(LeagueRun {
                report,
                inputs: Vec::new(),
                predictions: Vec::new(),
            });
        }
    };

    let mut inputs = Vec::new();
    let mut predictions = Vec::new();
    for m in matches.iter().filter(|m| split.is_holdout(m)) {
        cancel.check()?;
        report.holdout_rows += 1;
        let Some(score) = m.score else {
            diag.unplayed_holdout += 1;
            continue;
        };
        let Some(row) = rows.get(&m.match_id).copied() else {
            continue;
        };
        if row.is_cold_start() {
            diag.cold_start_skipped += 1;
            continue;
        }
        let probs = match model.predict_proba(row) {
            Ok(probs) => probs,
            Err(err) => {
                diag.record_predictor_error(m.match_id, &err);
                continue;
            }
        };
        report.scored += 1;
        predictions.push((probs.result, score.outcome()));
        inputs.extend(market_inputs(m, &probs, &mut diag));
    }

    let (preds, outcomes): (Vec<Prob3>, Vec<Outcome>) = predictions.iter().copied().unzip();
    report.metrics = calibration::evaluate_probs(&preds, &outcomes);
    report.diagnostics = diag;
    debug!(
        league_id = split.league_id,
        train = report.train_rows,
        scored = report.scored,
        inputs = inputs.len(),
        "league scored"
    );
    Ok(LeagueRun {
        report,
        inputs,
        predictions,
    })
}

fn results_by_match(matches: &[MatchRecord]) -> HashMap<u64, FinalScore> {
    matches
        .iter()
        .filter_map(|m| m.score.map(|s| (m.match_id, s)))
        .collect()
}

fn sweep(
    inputs: &[CandidateInput],
    results: &HashMap<u64, FinalScore>,
    cfg: &EngineConfig,
    cancel: &CancelToken,
) -> Result<Vec<SweepPoint>, EngineError> {
    let mut points = Vec::new();
    for &min_edge in &cfg.min_edge_sweep {
        let stake_cfg = StakeConfig {
            min_edge,
            ..cfg.staking
        };
        let mut scratch = Diagnostics::default();
        let candidates = select_candidates(inputs, &stake_cfg, &mut scratch);
        let res = backtest::simulate(&candidates, results, &cfg.backtest, &NoProgress, cancel)?;
        points.push(SweepPoint {
            min_edge,
            bets: res.summary.bets,
            win_rate: res.summary.win_rate,
            profit: res.summary.profit,
            roi: res.summary.roi,
            roi_interval: res.summary.roi_interval,
        });
    }
    Ok(points)
}

fn outcome_of(result: &BacktestResult, diag: &Diagnostics, guardrail_failures: usize) -> RunOutcome {
    if result.summary.bets > 0 {
        RunOutcome::BetsPlaced
    } else if diag.predictor_failures > 0 || diag.fit_failures > 0 || guardrail_failures > 0 {
        RunOutcome::Failed
    } else {
        RunOutcome::NoEdgeFound
    }
}

pub fn run_backtest<P: Predictor>(
    store: &dyn MatchStore,
    predictor: &P,
    cache: &FeatureCache,
    cfg: &EngineConfig,
    opts: &RunOptions,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<RunReport> {
    let requested: Option<BTreeSet<u32>> = opts.leagues.as_ref().map(|ids| ids.iter().copied().collect());
    let mut matches = match &requested {
        None => store.load_matches(None, None)?,
        Some(ids) => {
            let mut all = Vec::new();
            for id in ids {
                all.extend(store.load_matches(Some(*id), None)?);
            }
            all
        }
    };
    if matches.is_empty() {
        return Err(EngineError::EmptyDataset.into());
    }
    let dropped = crate::match_data::drop_repeated_ids(&mut matches);
    if dropped > 0 {
        warn!(dropped, "store returned repeated match ids; kept first occurrence");
    }
    crate::match_data::sort_chronologically(&mut matches);
    info!(matches = matches.len(), "matches loaded");

    let key = CacheKey::for_dataset(FEATURE_VERSION, &cfg.features, &matches);
    let compute = || FeatureEngine::new(matches.clone(), cfg.features).generate_table(progress, cancel);
    let lookup = if opts.regenerate_features {
        cache.force_regenerate(&key, compute)?
    } else {
        cache.get_or_compute(&key, compute)?
    };
    info!(status = ?lookup.status, rows = lookup.table().rows.len(), "feature table ready");
    let rows: HashMap<u64, &FeatureVector> = lookup
        .table()
        .rows
        .iter()
        .map(|r| (r.match_id(), r))
        .collect();

    let league_ids: Vec<u32> = match requested {
        Some(ids) => ids.into_iter().collect(),
        None => matches
            .iter()
            .map(|m| m.league_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
    };
    let plan = split::plan_leagues(&matches, &league_ids, &cfg.split);

    let mut leagues = Vec::new();
    let mut inputs = Vec::new();
    let mut predictions = Vec::new();
    let mut diagnostics = Diagnostics::default();
    let total = plan.leagues.len();
    for (done, split) in plan.leagues.values().enumerate() {
        cancel.check()?;
        progress.report(Progress::new("leagues", done, total));
        let run = run_league(split, &matches, &rows, predictor, cancel)?;
        diagnostics.absorb(&run.report.diagnostics);
        inputs.extend(run.inputs);
        predictions.extend(run.predictions);
        leagues.push(run.report);
    }
    progress.report(Progress::new("leagues", total, total));

    let candidates = select_candidates(&inputs, &cfg.staking, &mut diagnostics);
    for league in &mut leagues {
        league.candidates = candidates
            .iter()
            .filter(|c| c.league_id == league.league_id)
            .count();
    }

    let results = results_by_match(&matches);
    let result = backtest::simulate(&candidates, &results, &cfg.backtest, progress, cancel)?;
    for league in &mut leagues {
        let (mut staked, mut profit, mut bets) = (0.0, 0.0, 0usize);
        for b in result.bets.iter().filter(|b| b.candidate.league_id == league.league_id) {
            staked += b.stake;
            profit += b.profit;
            bets += 1;
        }
        league.bets = bets;
        league.staked = staked;
        league.profit = profit;
        league.roi = if staked > 0.0 { profit / staked } else { 0.0 };
    }

    let sweep = sweep(&inputs, &results, cfg, cancel)?;
    let (preds, outcomes): (Vec<Prob3>, Vec<Outcome>) = predictions.into_iter().unzip();
    let metrics = calibration::evaluate_probs(&preds, &outcomes);
    let outcome = outcome_of(&result, &diagnostics, plan.failures.len());
    info!(
        bets = result.summary.bets,
        roi = result.summary.roi,
        outcome = ?outcome,
        "walk-forward run finished"
    );

    Ok(RunReport {
        generated_at: chrono::Utc::now().timestamp(),
        mode: plan.mode,
        mode_label: plan.mode.label().to_string(),
        representative: plan.mode.is_representative(),
        holdout_seasons_per_league: cfg.split.holdout_seasons_per_league,
        feature_version: FEATURE_VERSION.to_string(),
        feature_fingerprint: key.fingerprint().to_string(),
        cache_status: lookup.status,
        config: cfg.clone(),
        leagues,
        guardrail_failures: plan.failures,
        metrics,
        summary: result.summary,
        diagnostics,
        sweep,
        outcome,
    })
}
