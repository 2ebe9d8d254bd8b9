use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::backtest::{BacktestSummary, RoiInterval};
use crate::calibration::Metrics;
use crate::config::EngineConfig;
use crate::error::GuardrailError;
use crate::feature_cache::CacheStatus;
use crate::split::{EvaluationMode, KickoffRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    BetsPlaced,
    /// Every candidate was scored and none cleared the filters.
    NoEdgeFound,
    /// No bets, and at least one league or candidate failed.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RejectionCounts {
    pub odds_out_of_range: usize,
    pub edge_below_minimum: usize,
    pub non_positive_kelly: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub predictor_failures: usize,
    pub predictor_error_samples: Vec<String>,
    pub fit_failures: usize,
    pub invalid_odds: usize,
    pub missing_odds: usize,
    pub cold_start_skipped: usize,
    pub unplayed_holdout: usize,
    pub rejections: RejectionCounts,
}

const ERROR_SAMPLES: usize = 5;

impl Diagnostics {
    pub fn record_predictor_error(&mut self, match_id: u64, err: &impl std::fmt::Display) {
        self.predictor_failures += 1;
        if self.predictor_error_samples.len() < ERROR_SAMPLES {
            self.predictor_error_samples.push(format!("match {match_id}: {err}"));
        }
    }

    pub fn absorb(&mut self, other: &Diagnostics) {
        self.predictor_failures += other.predictor_failures;
        for sample in &other.predictor_error_samples {
            if self.predictor_error_samples.len() < ERROR_SAMPLES {
                self.predictor_error_samples.push(sample.clone());
            }
        }
        self.fit_failures += other.fit_failures;
        self.invalid_odds += other.invalid_odds;
        self.missing_odds += other.missing_odds;
        self.cold_start_skipped += other.cold_start_skipped;
        self.unplayed_holdout += other.unplayed_holdout;
        self.rejections.odds_out_of_range += other.rejections.odds_out_of_range;
        self.rejections.edge_below_minimum += other.rejections.edge_below_minimum;
        self.rejections.non_positive_kelly += other.rejections.non_positive_kelly;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeagueReport {
    pub league_id: u32,
    pub train_seasons: Vec<u32>,
    pub holdout_seasons: Vec<u32>,
    pub train_range: Option<KickoffRange>,
    pub holdout_range: Option<KickoffRange>,
    pub train_rows: usize,
    pub holdout_rows: usize,
    pub scored: usize,
    pub candidates: usize,
    pub fit_error: Option<String>,
    pub metrics: Metrics,
    pub bets: usize,
    pub staked: f64,
    pub profit: f64,
    pub roi: f64,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepPoint {
    pub min_edge: f64,
    pub bets: usize,
    pub win_rate: f64,
    pub profit: f64,
    pub roi: f64,
    pub roi_interval: Option<RoiInterval>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub generated_at: i64,
    pub mode: EvaluationMode,
    pub mode_label: String,
    pub representative: bool,
    pub holdout_seasons_per_league: usize,
    pub feature_version: String,
    pub feature_fingerprint: String,
    pub cache_status: CacheStatus,
    pub config: EngineConfig,
    pub leagues: Vec<LeagueReport>,
    pub guardrail_failures: Vec<GuardrailError>,
    pub metrics: Metrics,
    pub summary: BacktestSummary,
    pub diagnostics: Diagnostics,
    pub sweep: Vec<SweepPoint>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn has_guardrail_failures(&self) -> bool {
        !self.guardrail_failures.is_empty()
    }
}

pub fn write_json(report: &RunReport, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(report).context("serialize run report")?;
    fs::write(&tmp, json).context("write run report")?;
    fs::rename(&tmp, path).context("swap run report")?;
    Ok(())
}

fn date(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn range(r: &Option<KickoffRange>) -> String {
    match r {
        Some(r) => format!("{}..{}", date(r.first), date(r.last)),
        None => "-".to_string(),
    }
}

pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Walk-forward backtest [{}]", report.mode_label);
    if !report.representative {
        let _ = writeln!(out, "WARNING: train == test; these numbers are not out-of-sample");
    }
    let _ = writeln!(
        out,
        "features {} ({:?}) fingerprint {}",
        report.feature_version,
        report.cache_status,
        report.feature_fingerprint.get(..12).unwrap_or(&report.feature_fingerprint)
    );
    let _ = writeln!(out);

    for l in &report.leagues {
        let _ = writeln!(
            out,
            "league {} train={:?} [{}] holdout={:?} [{}] rows={}/{} scored={} bets={} roi={:+.2}% ll={:.4} ece={:.4}",
            l.league_id,
            l.train_seasons,
            range(&l.train_range),
            l.holdout_seasons,
            range(&l.holdout_range),
            l.train_rows,
            l.holdout_rows,
            l.scored,
            l.bets,
            l.roi * 100.0,
            l.metrics.log_loss,
            l.metrics.calibration_error
        );
        if let Some(err) = &l.fit_error {
            let _ = writeln!(out, "  fit failed: {err}");
        }
    }
    for err in &report.guardrail_failures {
        let _ = writeln!(out, "guardrail: {err}");
    }

    let s = &report.summary;
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "bets={} wins={} win_rate={:.1}% staked={:.2} profit={:+.2} roi={:+.2}% bankroll {:.2} -> {:.2} max_dd={:.2}",
        s.bets,
        s.wins,
        s.win_rate * 100.0,
        s.staked,
        s.profit,
        s.roi * 100.0,
        s.initial_bankroll,
        s.final_bankroll,
        s.max_drawdown
    );
    if let Some(ci) = &s.roi_interval {
        let _ = writeln!(
            out,
            "roi {:.0}% CI [{:+.2}%, {:+.2}%] ({} match blocks, {} resamples)",
            ci.confidence * 100.0,
            ci.lower * 100.0,
            ci.upper * 100.0,
            ci.blocks,
            ci.resamples
        );
    }
    for m in &s.per_market {
        let _ = writeln!(
            out,
            "  {:<10} bets={:<5} win_rate={:>5.1}% roi={:+.2}%",
            m.market.label(),
            m.bets,
            m.win_rate * 100.0,
            m.roi * 100.0
        );
    }

    let d = &report.diagnostics;
    let _ = writeln!(
        out,
        "predictor_failures={} fit_failures={} invalid_odds={} missing_odds={} cold_start_skipped={}",
        d.predictor_failures, d.fit_failures, d.invalid_odds, d.missing_odds, d.cold_start_skipped
    );
    for sample in &d.predictor_error_samples {
        let _ = writeln!(out, "  {sample}");
    }

    if !report.sweep.is_empty() {
        let _ = writeln!(out);
        for p in &report.sweep {
            let _ = writeln!(
                out,
                "min_edge={:.3} bets={} win_rate={:.1}% roi={:+.2}%",
                p.min_edge,
                p.bets,
                p.win_rate * 100.0,
                p.roi * 100.0
            );
        }
    }
    let _ = writeln!(out, "outcome: {:?}", report.outcome);
    out
}
