use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use serde::Deserialize;

use matchedge::config;
use matchedge::match_data::{MatchRecord, Season};
use matchedge::store::SqliteMatchStore;

/// Loads a JSON export of seasons and matches into the local SQLite store.
#[derive(Debug, Parser)]
#[command(name = "import_matches")]
struct Args {
    /// JSON file shaped as `{"seasons": [...], "matches": [...]}`.
    input: PathBuf,
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ImportFile {
    #[serde(default)]
    seasons: Vec<Season>,
    matches: Vec<MatchRecord>,
}

fn main() -> Result<()> {
    config::load_dotenv();
    config::init_logging();
    let args = Args::parse();

    let raw = fs::read_to_string(&args.input)
        .with_context(|| format!("read {}", args.input.display()))?;
    let file: ImportFile = serde_json::from_str(&raw)
        .with_context(|| format!("parse {}", args.input.display()))?;
    if file.matches.is_empty() {
        return Err(anyhow!("{} contains no matches", args.input.display()));
    }

    let db_path = args
        .db
        .or_else(config::default_db_path)
        .context("unable to resolve sqlite path")?;
    let mut store = SqliteMatchStore::open(&db_path)?;
    let summary = store.import(&file.seasons, &file.matches)?;

    println!("Match import complete");
    println!("DB: {}", db_path.display());
    println!("Seasons upserted: {}", summary.seasons_upserted);
    println!(
        "Matches upserted: {} ({} completed)",
        summary.matches_upserted, summary.completed
    );
    for (league_id, count) in &summary.per_league {
        println!("league {league_id}: matches={count}");
    }
    let latest = summary
        .latest_kickoff_unix
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|d| d.to_rfc3339());
    println!("Latest kickoff: {}", latest.as_deref().unwrap_or("n/a"));
    println!("Matches in store: {}", store.match_count()?);
    if let Some(at) = store.last_import_at()? {
        println!("Import recorded at: {at}");
    }

    Ok(())
}
