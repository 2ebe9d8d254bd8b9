use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use matchedge::config::{self, EngineConfig};
use matchedge::match_data::MatchRecord;
use matchedge::picks;
use matchedge::predictor::PoissonGoalsPredictor;
use matchedge::progress::CancelToken;
use matchedge::store::{MatchStore, SqliteMatchStore};

/// Scores upcoming fixtures against the stored history and lists value bets.
#[derive(Debug, Parser)]
#[command(name = "value_picks")]
struct Args {
    #[arg(long)]
    db: Option<PathBuf>,
    /// JSON array of fixtures. Defaults to the unplayed matches in the database.
    #[arg(long)]
    fixtures: Option<PathBuf>,
    #[arg(long = "league", value_delimiter = ',')]
    leagues: Vec<u32>,
    #[arg(long)]
    min_edge: Option<f64>,
    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    config::load_dotenv();
    config::init_logging();
    let args = Args::parse();

    let mut cfg = EngineConfig::from_env();
    if let Some(v) = args.min_edge {
        cfg.staking.min_edge = v.clamp(0.0, 1.0);
    }

    let db_path = args
        .db
        .clone()
        .or_else(config::default_db_path)
        .context("unable to resolve sqlite path")?;
    let store = SqliteMatchStore::open(&db_path)?;
    let mut history = store.load_matches(None, None)?;
    if !args.leagues.is_empty() {
        history.retain(|m| args.leagues.contains(&m.league_id));
    }

    let fixtures: Vec<MatchRecord> = match &args.fixtures {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("read {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?
        }
        None => history.iter().filter(|m| !m.is_completed()).cloned().collect(),
    };
    let fixtures: Vec<MatchRecord> = fixtures
        .into_iter()
        .filter(|m| args.leagues.is_empty() || args.leagues.contains(&m.league_id))
        .collect();

    let report = picks::value_picks(
        history,
        &fixtures,
        &PoissonGoalsPredictor::default(),
        &cfg,
        &CancelToken::new(),
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Fixtures scored: {}", report.fixtures);
    println!("Value picks: {}", report.picks.len());
    for pick in &report.picks {
        let c = &pick.candidate;
        let kickoff = chrono::DateTime::from_timestamp(c.kickoff_unix, 0)
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| c.kickoff_unix.to_string());
        println!(
            "{kickoff} {} vs {} {:<9} odds={:.2} model={:.3} implied={:.3} edge={:+.3} stake={:.3}",
            pick.home_team,
            pick.away_team,
            c.market.label(),
            c.odds,
            c.model_prob,
            c.implied_prob,
            c.edge,
            c.stake_fraction
        );
    }
    for (league_id, err) in &report.fit_errors {
        println!("league {league_id}: no model ({err})");
    }
    let d = &report.diagnostics;
    println!(
        "skipped: cold_start={} predictor_failures={} invalid_odds={} missing_odds={}",
        d.cold_start_skipped, d.predictor_failures, d.invalid_odds, d.missing_odds
    );
    Ok(())
}
