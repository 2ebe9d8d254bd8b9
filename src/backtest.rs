//! Chronological bankroll replay over settled bet candidates.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;
use crate::match_data::{FinalScore, Market};
use crate::progress::{CancelToken, Progress, ProgressSink};
use crate::staking::BetCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StakePolicy {
    Flat { units: f64 },
    /// `stake_fraction` of the bankroll held when the match kicks off.
    Kelly,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub initial_bankroll: f64,
    pub stake_policy: StakePolicy,
    pub resamples: usize,
    pub confidence: f64,
    pub seed: u64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_bankroll: 1000.0,
            stake_policy: StakePolicy::Flat { units: 10.0 },
            resamples: 2000,
            confidence: 0.95,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SimPhase {
    Initialized,
    Running,
    Finalized,
}

/// Simulation-only balance. Updated once per settled bet, in kickoff order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BankrollState {
    pub balance: f64,
    pub peak: f64,
    pub max_drawdown: f64,
    pub settled: usize,
}

impl BankrollState {
    fn new(initial: f64) -> Self {
        Self {
            balance: initial,
            peak: initial,
            max_drawdown: 0.0,
            settled: 0,
        }
    }

    fn settle(&mut self, profit: f64) {
        self.balance += profit;
        self.peak = self.peak.max(self.balance);
        self.max_drawdown = self.max_drawdown.max(self.peak - self.balance);
        self.settled += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettledBet {
    pub candidate: BetCandidate,
    pub stake: f64,
    pub won: bool,
    pub returned: f64,
    pub profit: f64,
    pub bankroll_after: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSummary {
    pub market: Market,
    pub bets: usize,
    pub wins: usize,
    pub staked: f64,
    pub returned: f64,
    pub profit: f64,
    pub win_rate: f64,
    pub roi: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoiInterval {
    pub lower: f64,
    pub upper: f64,
    pub confidence: f64,
    pub resamples: usize,
    pub blocks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestSummary {
    pub bets: usize,
    pub wins: usize,
    pub matches: usize,
    pub win_rate: f64,
    pub staked: f64,
    pub returned: f64,
    pub profit: f64,
    pub roi: f64,
    pub initial_bankroll: f64,
    pub final_bankroll: f64,
    pub max_drawdown: f64,
    pub avg_odds: f64,
    pub avg_edge: f64,
    pub unsettled: usize,
    pub skipped: usize,
    pub per_market: Vec<MarketSummary>,
    pub roi_interval: Option<RoiInterval>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub summary: BacktestSummary,
    pub bets: Vec<SettledBet>,
}

pub struct Simulator {
    cfg: BacktestConfig,
    phase: SimPhase,
    state: BankrollState,
}

impl Simulator {
    pub fn new(cfg: BacktestConfig) -> Self {
        Self {
            cfg,
            phase: SimPhase::Initialized,
            state: BankrollState::new(cfg.initial_bankroll),
        }
    }

    pub fn phase(&self) -> SimPhase {
        self.phase
    }

    pub fn bankroll(&self) -> BankrollState {
        self.state
    }

    /// Replays every candidate whose match has a result. A finished simulator is
    /// spent; a cancelled one is rolled back to `Initialized` with its opening bankroll.
    pub fn run(
        &mut self,
        candidates: &[BetCandidate],
        results: &HashMap<u64, FinalScore>,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<BacktestResult, EngineError> {
        if self.phase != SimPhase::Initialized {
            return Err(EngineError::SimulatorSpent);
        }
        let mut ordered: Vec<&BetCandidate> = candidates.iter().collect();
        ordered.sort_by_key(|c| (c.kickoff_unix, c.match_id, c.market));

        let groups = group_by_match(&ordered);
        self.phase = SimPhase::Running;
        debug!(matches = groups.len(), bets = ordered.len(), "backtest running");
        progress.report(Progress::new("backtest", 0, groups.len()));

        let mut settled = Vec::with_capacity(ordered.len());
        let mut unsettled = 0usize;
        let mut skipped = 0usize;

        for (done, group) in groups.iter().enumerate() {
            if let Err(err) = cancel.check() {
                self.state = BankrollState::new(self.cfg.initial_bankroll);
                self.phase = SimPhase::Initialized;
                debug!(settled = settled.len(), "backtest cancelled, bankroll rolled back");
                return Err(err);
            }

            let Some(score) = results.get(&group[0].match_id) else {
                unsettled += group.len();
                continue;
            };
            // Every bet on a match is sized off the same opening bankroll.
            let opening = self.state.balance;
            for candidate in group {
                let stake = match self.cfg.stake_policy {
                    StakePolicy::Flat { units } => units,
                    StakePolicy::Kelly => candidate.stake_fraction * opening.max(0.0),
                };
                if stake <= 0.0 || !stake.is_finite() {
                    skipped += 1;
                    continue;
                }
                let won = candidate.market.settles_as_win(score);
                let returned = if won { stake * candidate.odds } else { 0.0 };
                let profit = returned - stake;
                self.state.settle(profit);
                settled.push(SettledBet {
                    candidate: (*candidate).clone(),
                    stake,
                    won,
                    returned,
                    profit,
                    bankroll_after: self.state.balance,
                });
            }
            progress.report(Progress::new("backtest", done + 1, groups.len()));
        }

        let summary = self.summarize(&settled, unsettled, skipped);
        self.phase = SimPhase::Finalized;
        debug!(bets = summary.bets, roi = summary.roi, "backtest finalized");
        Ok(BacktestResult {
            summary,
            bets: settled,
        })
    }

    fn summarize(&self, settled: &[SettledBet], unsettled: usize, skipped: usize) -> BacktestSummary {
        let totals = Totals::from_bets(settled.iter());
        let mut per_market = Vec::new();
        for market in Market::ALL {
            let bets: Vec<&SettledBet> = settled.iter().filter(|b| b.candidate.market == market).collect();
            if bets.is_empty() {
                continue;
            }
            let t = Totals::from_bets(bets.iter().copied());
            per_market.push(MarketSummary {
                market,
                bets: t.bets,
                wins: t.wins,
                staked: t.staked,
                returned: t.returned,
                profit: t.profit(),
                win_rate: t.win_rate(),
                roi: t.roi(),
            });
        }

        let blocks = match_blocks(settled);
        let roi_interval = bootstrap_roi(&blocks, self.cfg.resamples, self.cfg.confidence, self.cfg.seed);
        let n = settled.len().max(1) as f64;

        BacktestSummary {
            bets: totals.bets,
            wins: totals.wins,
            matches: blocks.len(),
            win_rate: totals.win_rate(),
            staked: totals.staked,
            returned: totals.returned,
            profit: totals.profit(),
            roi: totals.roi(),
            initial_bankroll: self.cfg.initial_bankroll,
            final_bankroll: self.state.balance,
            max_drawdown: self.state.max_drawdown,
            avg_odds: settled.iter().map(|b| b.candidate.odds).sum::<f64>() / n,
            avg_edge: settled.iter().map(|b| b.candidate.edge).sum::<f64>() / n,
            unsettled,
            skipped,
            per_market,
            roi_interval,
        }
    }
}

pub fn simulate(
    candidates: &[BetCandidate],
    results: &HashMap<u64, FinalScore>,
    cfg: &BacktestConfig,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<BacktestResult, EngineError> {
    Simulator::new(*cfg).run(candidates, results, progress, cancel)
}

#[derive(Default)]
struct Totals {
    bets: usize,
    wins: usize,
    staked: f64,
    returned: f64,
}

impl Totals {
    fn from_bets<'a>(bets: impl Iterator<Item = &'a SettledBet>) -> Self {
        let mut t = Totals::default();
        for b in bets {
            t.bets += 1;
            t.wins += usize::from(b.won);
            t.staked += b.stake;
            t.returned += b.returned;
        }
        t
    }

    fn profit(&self) -> f64 {
        self.returned - self.staked
    }

    fn win_rate(&self) -> f64 {
        if self.bets == 0 {
            return 0.0;
        }
        self.wins as f64 / self.bets as f64
    }

    fn roi(&self) -> f64 {
        if self.staked <= 0.0 {
            return 0.0;
        }
        self.profit() / self.staked
    }
}

fn group_by_match<'a>(ordered: &[&'a BetCandidate]) -> Vec<Vec<&'a BetCandidate>> {
    let mut groups: Vec<Vec<&BetCandidate>> = Vec::new();
    for &c in ordered {
        match groups.last_mut() {
            Some(last) if last[0].match_id == c.match_id => last.push(c),
            _ => groups.push(vec![c]),
        }
    }
    groups
}

pub fn match_blocks(settled: &[SettledBet]) -> Vec<(f64, f64)> {
    let mut blocks: Vec<(u64, f64, f64)> = Vec::new();
    for b in settled {
        match blocks.last_mut() {
            Some(last) if last.0 == b.candidate.match_id => {
                last.1 += b.profit;
                last.2 += b.stake;
            }
            _ => blocks.push((b.candidate.match_id, b.profit, b.stake)),
        }
    }
    blocks.into_iter().map(|(_, profit, staked)| (profit, staked)).collect()
}

/// Percentile interval of ROI, resampling whole matches with replacement so
/// correlated bets on one match always move together.
pub fn bootstrap_roi(blocks: &[(f64, f64)], resamples: usize, confidence: f64, seed: u64) -> Option<RoiInterval> {
    if blocks.is_empty() || resamples == 0 {
        return None;
    }
    let confidence = confidence.clamp(0.5, 0.999);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rois = Vec::with_capacity(resamples);
    for _ in 0..resamples {
        let mut profit = 0.0;
        let mut staked = 0.0;
        for _ in 0..blocks.len() {
            let (p, s) = blocks[rng.gen_range(0..blocks.len())];
            profit += p;
            staked += s;
        }
        rois.push(if staked > 0.0 { profit / staked } else { 0.0 });
    }
    rois.sort_by(|a, b| a.total_cmp(b));

    let tail = (1.0 - confidence) / 2.0;
    Some(RoiInterval {
        lower: percentile(&rois, tail),
        upper: percentile(&rois, 1.0 - tail),
        confidence,
        resamples,
        blocks: blocks.len(),
    })
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
