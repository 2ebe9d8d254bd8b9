use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use matchedge::backtest::StakePolicy;
use matchedge::config::{self, EngineConfig};
use matchedge::feature_cache::FeatureCache;
use matchedge::pipeline::{self, RunOptions};
use matchedge::predictor::PoissonGoalsPredictor;
use matchedge::progress::{CancelToken, Progress};
use matchedge::report::{self, RunReport};
use matchedge::store::SqliteMatchStore;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StakeArg {
    Flat,
    Kelly,
}

/// Walk-forward backtest of value bets over the imported match history.
#[derive(Debug, Parser)]
#[command(name = "backtest")]
struct Args {
    /// SQLite database written by `import_matches`.
    #[arg(long)]
    db: Option<PathBuf>,
    /// League ids to evaluate; defaults to every league in the database.
    #[arg(long = "league", value_delimiter = ',')]
    leagues: Vec<u32>,
    #[arg(long)]
    holdout_seasons: Option<usize>,
    #[arg(long)]
    min_train_seasons: Option<usize>,
    /// Train and test on the same seasons. The report is flagged as non-representative.
    #[arg(long)]
    in_sample: bool,
    #[arg(long)]
    regenerate_features: bool,
    /// Keep the feature table in memory only.
    #[arg(long)]
    no_feature_cache: bool,
    #[arg(long)]
    min_edge: Option<f64>,
    #[arg(long)]
    min_odds: Option<f64>,
    #[arg(long)]
    max_odds: Option<f64>,
    #[arg(long)]
    kelly_fraction: Option<f64>,
    #[arg(long, value_enum)]
    stake: Option<StakeArg>,
    #[arg(long)]
    flat_stake: Option<f64>,
    #[arg(long)]
    bankroll: Option<f64>,
    #[arg(long)]
    resamples: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// Extra minimum-edge thresholds replayed over the same predictions.
    #[arg(long, value_delimiter = ',')]
    sweep_min_edge: Vec<f64>,
    /// Write the full JSON report here.
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        let mut cfg = EngineConfig::from_env();
        if let Some(v) = self.holdout_seasons {
            cfg.split.holdout_seasons_per_league = v.max(1);
        }
        if let Some(v) = self.min_train_seasons {
            cfg.split.min_train_seasons = v.max(1);
        }
        cfg.split.in_sample = self.in_sample;
        if let Some(v) = self.min_edge {
            cfg.staking.min_edge = v.clamp(0.0, 1.0);
        }
        if let Some(v) = self.min_odds {
            cfg.staking.min_odds = v.max(1.01);
        }
        if let Some(v) = self.max_odds {
            cfg.staking.max_odds = v.max(1.01);
        }
        if let Some(v) = self.kelly_fraction {
            cfg.staking.kelly_fraction = v.clamp(0.0, 1.0);
        }
        match self.stake {
            Some(StakeArg::Kelly) => cfg.backtest.stake_policy = StakePolicy::Kelly,
            Some(StakeArg::Flat) => {
                cfg.backtest.stake_policy = StakePolicy::Flat {
                    units: self.flat_stake.unwrap_or(10.0).max(0.01),
                }
            }
            None => {
                if let (Some(units), StakePolicy::Flat { .. }) =
                    (self.flat_stake, cfg.backtest.stake_policy)
                {
                    cfg.backtest.stake_policy = StakePolicy::Flat {
                        units: units.max(0.01),
                    };
                }
            }
        }
        if let Some(v) = self.bankroll {
            cfg.backtest.initial_bankroll = v.max(1.0);
        }
        if let Some(v) = self.resamples {
            cfg.backtest.resamples = v;
        }
        if let Some(v) = self.seed {
            cfg.backtest.seed = v;
        }
        if !self.sweep_min_edge.is_empty() {
            cfg.min_edge_sweep = self.sweep_min_edge.clone();
        }
        cfg
    }
}

fn main() -> ExitCode {
    config::load_dotenv();
    config::init_logging();
    let args = Args::parse();

    match run(&args) {
        Ok(report) => {
            print!("{}", report::render_text(&report));
            if report.has_guardrail_failures() {
                eprintln!(
                    "{} league(s) failed the temporal guardrail",
                    report.guardrail_failures.len()
                );
                return ExitCode::from(2);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("backtest failed: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: &Args) -> Result<RunReport> {
    let cfg = args.engine_config();
    let db_path = args
        .db
        .clone()
        .or_else(config::default_db_path)
        .context("unable to resolve sqlite path")?;
    let store = SqliteMatchStore::open(&db_path)?;
    info!(db = %db_path.display(), matches = store.match_count()?, "store opened");

    let cache = match config::feature_cache_dir() {
        Some(dir) if !args.no_feature_cache => FeatureCache::in_dir(dir),
        _ => FeatureCache::in_memory(),
    };
    let opts = RunOptions {
        leagues: (!args.leagues.is_empty()).then(|| args.leagues.clone()),
        regenerate_features: args.regenerate_features,
    };

    let progress = |p: Progress| {
        if p.done == p.total || p.done % 1000 == 0 {
            info!(step = p.step, done = p.done, total = p.total, "progress");
        }
    };
    let report = pipeline::run_backtest(
        &store,
        &PoissonGoalsPredictor::default(),
        &cache,
        &cfg,
        &opts,
        &progress,
        &CancelToken::new(),
    )?;

    if let Some(path) = &args.report {
        report::write_json(&report, path)?;
        info!(path = %path.display(), "report written");
    }
    Ok(report)
}
