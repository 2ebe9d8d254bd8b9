use std::collections::HashMap;
use std::sync::Mutex;

use matchedge::backtest::{self, BacktestConfig, SimPhase, Simulator, StakePolicy};
use matchedge::error::EngineError;
use matchedge::match_data::{FinalScore, Market};
use matchedge::progress::{CancelToken, NoProgress, Progress};
use matchedge::staking::BetCandidate;

fn bet(match_id: u64, kickoff: i64, market: Market, odds: f64, stake_fraction: f64) -> BetCandidate {
    BetCandidate {
        match_id,
        league_id: 1,
        season_id: 2024,
        kickoff_unix: kickoff,
        market,
        odds,
        model_prob: 0.5,
        implied_prob: 0.42,
        edge: 0.08,
        stake_fraction,
    }
}

fn score(home_goals: u8, away_goals: u8) -> FinalScore {
    FinalScore {
        home_goals,
        away_goals,
    }
}

fn flat(units: f64) -> BacktestConfig {
    BacktestConfig {
        stake_policy: StakePolicy::Flat { units },
        resamples: 200,
        ..BacktestConfig::default()
    }
}

#[test]
fn flat_stakes_settle_in_kickoff_order() {
    let candidates = vec![
        bet(2, 200, Market::Away, 3.0, 0.05),
        bet(1, 100, Market::Home, 2.0, 0.05),
        bet(3, 300, Market::Over25, 1.9, 0.05),
    ];
    let results = HashMap::from([(1, score(2, 0)), (2, score(1, 1)), (3, score(2, 1))]);
    let res = backtest::simulate(&candidates, &results, &flat(10.0), &NoProgress, &CancelToken::new()).unwrap();

    let ids: Vec<u64> = res.bets.iter().map(|b| b.candidate.match_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    let s = &res.summary;
    assert_eq!(s.bets, 3);
    assert_eq!(s.wins, 2);
    assert!((s.staked - 30.0).abs() < 1e-9);
    assert!((s.profit - (10.0 - 10.0 + 9.0)).abs() < 1e-9);
    assert!((s.roi - 9.0 / 30.0).abs() < 1e-9);
    assert!((s.final_bankroll - 1009.0).abs() < 1e-9);
    assert!((s.max_drawdown - 10.0).abs() < 1e-9);
    assert_eq!(s.matches, 3);
    assert_eq!(s.per_market.len(), 3);
}

#[test]
fn kelly_bets_on_one_match_share_the_opening_bankroll() {
    let candidates = vec![
        bet(1, 100, Market::Home, 2.0, 0.10),
        bet(1, 100, Market::Over25, 2.0, 0.10),
        bet(2, 200, Market::Home, 2.0, 0.10),
    ];
    let results = HashMap::from([(1, score(0, 1)), (2, score(1, 0))]);
    let cfg = BacktestConfig {
        stake_policy: StakePolicy::Kelly,
        initial_bankroll: 1000.0,
        resamples: 0,
        ..BacktestConfig::default()
    };
    let res = backtest::simulate(&candidates, &results, &cfg, &NoProgress, &CancelToken::new()).unwrap();

    assert_eq!(res.bets[0].stake, 100.0);
    assert_eq!(res.bets[1].stake, 100.0);
    // Both lost, so match 2 is sized off 800.
    assert!((res.bets[2].stake - 80.0).abs() < 1e-9);
    assert!((res.summary.final_bankroll - 880.0).abs() < 1e-9);
    assert!(res.summary.roi_interval.is_none());
}

#[test]
fn unplayed_matches_are_counted_not_settled() {
    let candidates = vec![bet(1, 100, Market::Home, 2.0, 0.05), bet(9, 200, Market::Draw, 3.4, 0.05)];
    let results = HashMap::from([(1, score(1, 0))]);
    let res = backtest::simulate(&candidates, &results, &flat(5.0), &NoProgress, &CancelToken::new()).unwrap();
    assert_eq!(res.summary.bets, 1);
    assert_eq!(res.summary.unsettled, 1);
}

#[test]
fn bootstrap_resamples_whole_matches() {
    let mut candidates = Vec::new();
    let mut results = HashMap::new();
    for id in 0..40u64 {
        // Two perfectly correlated bets per match.
        candidates.push(bet(id, id as i64 * 10, Market::Home, 2.0, 0.05));
        candidates.push(bet(id, id as i64 * 10, Market::Over25, 2.0, 0.05));
        let s = if id % 2 == 0 { score(3, 0) } else { score(0, 0) };
        results.insert(id, s);
    }
    let cfg = flat(10.0);
    let res = backtest::simulate(&candidates, &results, &cfg, &NoProgress, &CancelToken::new()).unwrap();
    let blocks = backtest::match_blocks(&res.bets);
    assert_eq!(blocks.len(), 40);
    assert!(blocks.iter().all(|(_, staked)| (*staked - 20.0).abs() < 1e-9));

    let ci = res.summary.roi_interval.unwrap();
    assert_eq!(ci.blocks, 40);
    assert!(ci.lower < res.summary.roi && res.summary.roi < ci.upper);

    let again = backtest::bootstrap_roi(&blocks, cfg.resamples, cfg.confidence, cfg.seed).unwrap();
    assert_eq!(again, ci);
}

#[test]
fn cancellation_emits_no_summary() {
    let candidates: Vec<BetCandidate> = (0..50).map(|i| bet(i, i as i64, Market::Home, 2.0, 0.05)).collect();
    let results: HashMap<u64, FinalScore> = (0..50).map(|i| (i, score(1, 0))).collect();
    let cancel = CancelToken::new();
    let seen = Mutex::new(0usize);
    let sink = |p: Progress| {
        if p.done >= 10 {
            cancel.cancel();
        }
        *seen.lock().unwrap() += 1;
    };
    let mut sim = Simulator::new(flat(10.0));
    let err = sim.run(&candidates, &results, &sink, &cancel).unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert!(*seen.lock().unwrap() > 0);
    assert_eq!(sim.phase(), SimPhase::Initialized);
    assert_eq!(sim.bankroll(), Simulator::new(flat(10.0)).bankroll());

    // The rolled-back simulator can still produce a full run.
    let res = sim.run(&candidates, &results, &NoProgress, &CancelToken::new()).unwrap();
    assert_eq!(sim.phase(), SimPhase::Finalized);
    assert_eq!(res.summary.bets, 50);
}

#[test]
fn a_simulator_runs_once() {
    let candidates = vec![bet(1, 100, Market::Home, 2.0, 0.05)];
    let results = HashMap::from([(1, score(1, 0))]);
    let mut sim = Simulator::new(flat(10.0));
    sim.run(&candidates, &results, &NoProgress, &CancelToken::new()).unwrap();
    assert_eq!(sim.phase(), SimPhase::Finalized);
    assert_eq!(sim.bankroll().settled, 1);
    let err = sim.run(&candidates, &results, &NoProgress, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, EngineError::SimulatorSpent));
}
