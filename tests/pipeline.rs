mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use matchedge::config::EngineConfig;
use matchedge::error::{GuardrailError, PredictorError};
use matchedge::feature_cache::{CacheMiss, CacheStatus, FeatureCache};
use matchedge::features::FeatureVector;
use matchedge::match_data::{FinalScore, MatchRecord};
use matchedge::picks;
use matchedge::pipeline::{self, RunOptions};
use matchedge::predictor::{FittedModel, OutcomeProbs, PoissonGoalsPredictor, PoissonModel, Predictor};
use matchedge::progress::{CancelToken, NoProgress};
use matchedge::report::{RunOutcome, RunReport};
use matchedge::store::{MatchStore, MemoryMatchStore, SqliteMatchStore};
use matchedge::worker::{self, WorkerEvent};

use common::synthetic_league;

fn two_league_store() -> MemoryMatchStore {
    let a = synthetic_league(47, 8, &[2021, 2022, 2023], 10);
    let b = synthetic_league(87, 8, &[2021, 2022, 2023], 20);
    let mut matches = a.matches;
    matches.extend(b.matches);
    let mut seasons = a.seasons;
    seasons.extend(b.seasons);
    MemoryMatchStore::new(matches, seasons)
}

fn quick_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.backtest.resamples = 100;
    cfg
}

struct BrokenPredictor;

struct BrokenModel;

impl Predictor for BrokenPredictor {
    type Model = BrokenModel;

    fn fit(&self, _rows: &[&FeatureVector], _labels: &[FinalScore]) -> Result<BrokenModel, PredictorError> {
        Ok(BrokenModel)
    }
}

impl FittedModel for BrokenModel {
    fn predict_proba(&self, _row: &FeatureVector) -> Result<OutcomeProbs, PredictorError> {
        Err(PredictorError::Model("inference crashed".into()))
    }
}

struct SlowPredictor(PoissonGoalsPredictor);

impl Predictor for SlowPredictor {
    type Model = PoissonModel;

    fn fit(&self, rows: &[&FeatureVector], labels: &[FinalScore]) -> Result<PoissonModel, PredictorError> {
        thread::sleep(Duration::from_millis(300));
        self.0.fit(rows, labels)
    }
}

fn default_run(store: &dyn MatchStore) -> RunReport {
    pipeline::run_backtest(
        store,
        &PoissonGoalsPredictor::default(),
        &FeatureCache::in_memory(),
        &quick_config(),
        &RunOptions::default(),
        &NoProgress,
        &CancelToken::new(),
    )
    .unwrap()
}

#[test]
fn walk_forward_run_scores_only_holdout_seasons() {
    let store = two_league_store();
    let mut cfg = quick_config();
    cfg.min_edge_sweep = vec![0.0, 0.03, 0.10];
    let cache = FeatureCache::in_memory();
    let report = pipeline::run_backtest(
        &store,
        &PoissonGoalsPredictor::default(),
        &cache,
        &cfg,
        &RunOptions::default(),
        &NoProgress,
        &CancelToken::new(),
    )
    .unwrap();

    assert!(report.representative);
    assert!(report.guardrail_failures.is_empty());
    assert_eq!(report.leagues.len(), 2);
    assert_eq!(report.cache_status, CacheStatus::Regenerated(CacheMiss::Empty));
    assert_eq!(report.diagnostics.predictor_failures, 0);
    assert_ne!(report.outcome, RunOutcome::Failed);

    let first = &report.leagues[0];
    assert_eq!(first.league_id, 47);
    assert_eq!(first.train_seasons, vec![2021, 2022]);
    assert_eq!(first.holdout_seasons, vec![2023]);
    assert!(first.train_range.unwrap().last < first.holdout_range.unwrap().first);
    assert!(first.fit_error.is_none());
    assert!(first.scored > 0);
    assert!(first.metrics.calibration_error > 0.0 && first.metrics.calibration_error < 1.0);
    assert!(report.metrics.calibration_error > 0.0);

    let candidates: usize = report.leagues.iter().map(|l| l.candidates).sum();
    let s = &report.summary;
    assert_eq!(s.bets + s.unsettled + s.skipped, candidates);
    assert_eq!(report.leagues.iter().map(|l| l.bets).sum::<usize>(), s.bets);
    assert_eq!(report.sweep.len(), 3);
    assert!(report.sweep.windows(2).all(|w| w[0].bets >= w[1].bets));

    // Second run over the same data is served from the cache.
    let again = pipeline::run_backtest(
        &store,
        &PoissonGoalsPredictor::default(),
        &cache,
        &cfg,
        &RunOptions::default(),
        &NoProgress,
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(again.cache_status, CacheStatus::Hit);
    assert_eq!(again.summary, report.summary);
}

#[test]
fn inference_failures_are_counted_and_reported() {
    let store = two_league_store();
    let report = pipeline::run_backtest(
        &store,
        &BrokenPredictor,
        &FeatureCache::in_memory(),
        &quick_config(),
        &RunOptions::default(),
        &NoProgress,
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.summary.bets, 0);
    assert!(report.diagnostics.predictor_failures > 0);
    assert!(report.diagnostics.predictor_error_samples.len() <= 5);
    assert!(report.diagnostics.predictor_error_samples[0].contains("inference crashed"));
}

#[test]
fn no_edge_is_distinct_from_failure() {
    let store = two_league_store();
    let mut cfg = quick_config();
    cfg.staking.min_edge = 1.0;
    let report = pipeline::run_backtest(
        &store,
        &PoissonGoalsPredictor::default(),
        &FeatureCache::in_memory(),
        &cfg,
        &RunOptions::default(),
        &NoProgress,
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(report.outcome, RunOutcome::NoEdgeFound);
    assert!(report.diagnostics.rejections.edge_below_minimum > 0);
}

#[test]
fn league_without_enough_seasons_is_reported_not_fatal() {
    let mut store = two_league_store();
    let short = synthetic_league(99, 6, &[2023], 30);
    store.matches.extend(short.matches);
    let opts = RunOptions {
        leagues: Some(vec![47, 99]),
        regenerate_features: false,
    };
    let report = pipeline::run_backtest(
        &store,
        &PoissonGoalsPredictor::default(),
        &FeatureCache::in_memory(),
        &quick_config(),
        &opts,
        &NoProgress,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(report.has_guardrail_failures());
    assert!(matches!(
        report.guardrail_failures[0],
        GuardrailError::InsufficientTrainSeasons { league_id: 99, .. }
    ));
    assert_eq!(report.leagues.len(), 1);
    assert_eq!(report.leagues[0].league_id, 47);
}

#[test]
fn repeated_leagues_and_rows_are_loaded_once() {
    let league = synthetic_league(47, 8, &[2021, 2022, 2023], 10);
    let store = MemoryMatchStore::new(league.matches.clone(), league.seasons.clone());
    let run = |store: &MemoryMatchStore, leagues: Vec<u32>| {
        pipeline::run_backtest(
            store,
            &PoissonGoalsPredictor::default(),
            &FeatureCache::in_memory(),
            &quick_config(),
            &RunOptions {
                leagues: Some(leagues),
                regenerate_features: false,
            },
            &NoProgress,
            &CancelToken::new(),
        )
        .unwrap()
    };

    let once = run(&store, vec![47]);
    let twice = run(&store, vec![47, 47]);
    assert_eq!(once.leagues.len(), 1);
    assert_eq!(twice.leagues.len(), 1);
    assert_eq!(once.leagues[0].train_rows, twice.leagues[0].train_rows);
    assert_eq!(once.summary, twice.summary);

    let mut doubled = league.matches.clone();
    doubled.extend(league.matches.iter().cloned());
    let dup_store = MemoryMatchStore::new(doubled, league.seasons);
    let from_dups = run(&dup_store, vec![47]);
    assert_eq!(from_dups.feature_fingerprint, once.feature_fingerprint);
    assert_eq!(from_dups.leagues[0].train_rows, once.leagues[0].train_rows);
    assert_eq!(from_dups.summary, once.summary);
}

#[test]
fn in_sample_runs_are_flagged() {
    let store = two_league_store();
    let mut cfg = quick_config();
    cfg.split.in_sample = true;
    let report = pipeline::run_backtest(
        &store,
        &PoissonGoalsPredictor::default(),
        &FeatureCache::in_memory(),
        &cfg,
        &RunOptions::default(),
        &NoProgress,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(!report.representative);
    assert_eq!(report.leagues[0].train_seasons, report.leagues[0].holdout_seasons);
    assert!(matchedge::report::render_text(&report).contains("not out-of-sample"));
}

#[test]
fn sqlite_store_feeds_the_same_run() {
    let mem = two_league_store();
    let mut sqlite = SqliteMatchStore::open_in_memory().unwrap();
    sqlite.import(&mem.seasons, &mem.matches).unwrap();
    assert_eq!(sqlite.match_count().unwrap(), mem.matches.len());

    let from_memory = default_run(&mem);
    let from_sqlite = default_run(&sqlite);
    assert_eq!(from_memory.feature_fingerprint, from_sqlite.feature_fingerprint);
    assert_eq!(from_memory.summary, from_sqlite.summary);
}

#[test]
fn background_run_reports_progress_and_finishes() {
    let handle = worker::spawn_backtest(
        two_league_store(),
        PoissonGoalsPredictor::default(),
        Arc::new(FeatureCache::in_memory()),
        quick_config(),
        RunOptions::default(),
    );
    match handle.wait() {
        WorkerEvent::Finished(report) => assert_eq!(report.leagues.len(), 2),
        other => panic!("unexpected terminal event: {other:?}"),
    }
}

#[test]
fn background_run_can_be_cancelled() {
    let handle = worker::spawn_backtest(
        two_league_store(),
        SlowPredictor(PoissonGoalsPredictor::default()),
        Arc::new(FeatureCache::in_memory()),
        quick_config(),
        RunOptions::default(),
    );
    handle.cancel();
    assert!(matches!(handle.wait(), WorkerEvent::Cancelled));
}

#[test]
fn upcoming_fixtures_get_value_picks() {
    let league = synthetic_league(47, 8, &[2022, 2023], 40);
    let split_at = league.matches.len() - 4;
    let history: Vec<MatchRecord> = league.matches[..split_at].to_vec();
    let fixtures: Vec<MatchRecord> = league.matches[split_at..]
        .iter()
        .cloned()
        .map(|mut m| {
            m.score = None;
            m
        })
        .collect();

    let mut cfg = EngineConfig::default();
    cfg.staking.min_edge = 0.0;
    let report = picks::value_picks(
        history,
        &fixtures,
        &PoissonGoalsPredictor::default(),
        &cfg,
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(report.fixtures, 4);
    assert!(report.fit_errors.is_empty());
    assert!(report.picks.windows(2).all(|w| w[0].candidate.edge >= w[1].candidate.edge));
    for pick in &report.picks {
        assert!(pick.candidate.model_prob * pick.candidate.odds > 1.0);
    }
}
