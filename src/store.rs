use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::match_data::{self, FinalScore, MatchRecord, Season};

/// Read-only source of match history. Implementations should return matches in
/// kickoff order, but consumers sort again before windowing.
pub trait MatchStore {
    fn load_matches(&self, league: Option<u32>, season: Option<u32>) -> Result<Vec<MatchRecord>>;

    fn load_seasons(&self, league: Option<u32>) -> Result<Vec<Season>>;
}

#[derive(Debug, Clone, Default)]
pub struct ImportSummary {
    pub matches_upserted: usize,
    pub seasons_upserted: usize,
    pub completed: usize,
    pub per_league: BTreeMap<u32, usize>,
    pub latest_kickoff_unix: Option<i64>,
}

pub struct SqliteMatchStore {
    conn: Connection,
}

impl SqliteMatchStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite db {}", path.display()))?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn import(&mut self, seasons: &[Season], matches: &[MatchRecord]) -> Result<ImportSummary> {
        let started_at = Utc::now().to_rfc3339();
        let tx = self.conn.transaction().context("begin import")?;
        let mut summary = ImportSummary::default();

        for s in seasons {
            upsert_season(&tx, s)?;
            summary.seasons_upserted += 1;
        }
        for m in matches {
            upsert_match(&tx, m)?;
            summary.matches_upserted += 1;
            summary.completed += usize::from(m.is_completed());
            *summary.per_league.entry(m.league_id).or_default() += 1;
            summary.latest_kickoff_unix = summary.latest_kickoff_unix.max(Some(m.kickoff_unix));
        }

        tx.execute(
            r#"
            INSERT INTO import_runs (started_at, finished_at, matches_upserted, seasons_upserted)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                started_at,
                Utc::now().to_rfc3339(),
                summary.matches_upserted as i64,
                summary.seasons_upserted as i64,
            ],
        )
        .context("record import run")?;
        tx.commit().context("commit import")?;
        debug!(
            matches = summary.matches_upserted,
            seasons = summary.seasons_upserted,
            "import committed"
        );
        Ok(summary)
    }

    pub fn match_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM matches", [], |row| row.get(0))
            .context("count matches")?;
        Ok(n as usize)
    }

    pub fn last_import_at(&self) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT finished_at FROM import_runs ORDER BY run_id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("read last import run")
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS seasons (
            season_id INTEGER PRIMARY KEY,
            league_id INTEGER NOT NULL,
            label TEXT NOT NULL,
            start_unix INTEGER NULL
        );
        CREATE INDEX IF NOT EXISTS idx_seasons_league ON seasons(league_id);

        CREATE TABLE IF NOT EXISTS matches (
            match_id INTEGER PRIMARY KEY,
            league_id INTEGER NOT NULL,
            season_id INTEGER NOT NULL,
            kickoff_unix INTEGER NOT NULL,
            game_week INTEGER NULL,
            home_team_id INTEGER NOT NULL,
            away_team_id INTEGER NOT NULL,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            home_goals INTEGER NULL,
            away_goals INTEGER NULL,
            stats_json TEXT NOT NULL,
            prematch_json TEXT NOT NULL,
            odds_json TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_league ON matches(league_id);
        CREATE INDEX IF NOT EXISTS idx_matches_season ON matches(season_id);
        CREATE INDEX IF NOT EXISTS idx_matches_kickoff ON matches(kickoff_unix);

        CREATE TABLE IF NOT EXISTS import_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            matches_upserted INTEGER NOT NULL,
            seasons_upserted INTEGER NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

fn upsert_season(tx: &rusqlite::Transaction<'_>, s: &Season) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO seasons (season_id, league_id, label, start_unix)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(season_id) DO UPDATE SET
            league_id = excluded.league_id,
            label = excluded.label,
            start_unix = excluded.start_unix
        "#,
        params![s.season_id as i64, s.league_id as i64, s.label, s.start_unix],
    )
    .with_context(|| format!("upsert season {}", s.season_id))?;
    Ok(())
}

fn upsert_match(tx: &rusqlite::Transaction<'_>, m: &MatchRecord) -> Result<()> {
    let stats = serde_json::to_string(&m.stats).context("serialize match stats")?;
    let prematch = serde_json::to_string(&m.prematch).context("serialize pre-match fields")?;
    let odds = serde_json::to_string(&m.odds).context("serialize odds")?;
    tx.execute(
        r#"
        INSERT INTO matches (
            match_id, league_id, season_id, kickoff_unix, game_week,
            home_team_id, away_team_id, home_team, away_team,
            home_goals, away_goals, stats_json, prematch_json, odds_json, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9,
            ?10, ?11, ?12, ?13, ?14, ?15
        )
        ON CONFLICT(match_id) DO UPDATE SET
            league_id = excluded.league_id,
            season_id = excluded.season_id,
            kickoff_unix = excluded.kickoff_unix,
            game_week = excluded.game_week,
            home_team_id = excluded.home_team_id,
            away_team_id = excluded.away_team_id,
            home_team = excluded.home_team,
            away_team = excluded.away_team,
            home_goals = excluded.home_goals,
            away_goals = excluded.away_goals,
            stats_json = excluded.stats_json,
            prematch_json = excluded.prematch_json,
            odds_json = excluded.odds_json,
            updated_at = excluded.updated_at
        "#,
        params![
            m.match_id as i64,
            m.league_id as i64,
            m.season_id as i64,
            m.kickoff_unix,
            m.game_week,
            m.home_team_id as i64,
            m.away_team_id as i64,
            m.home_team,
            m.away_team,
            m.score.map(|s| s.home_goals as i64),
            m.score.map(|s| s.away_goals as i64),
            stats,
            prematch,
            odds,
            Utc::now().to_rfc3339(),
        ],
    )
    .with_context(|| format!("upsert match {}", m.match_id))?;
    Ok(())
}

struct RawMatch {
    record: MatchRecord,
    home_goals: Option<i64>,
    away_goals: Option<i64>,
    stats: String,
    prematch: String,
    odds: String,
}

fn decode(raw: RawMatch) -> Result<MatchRecord> {
    let mut record = raw.record;
    record.score = match (raw.home_goals, raw.away_goals) {
        (Some(h), Some(a)) => Some(FinalScore {
            home_goals: u8::try_from(h).map_err(|_| anyhow!("match {}: bad home goals {h}", record.match_id))?,
            away_goals: u8::try_from(a).map_err(|_| anyhow!("match {}: bad away goals {a}", record.match_id))?,
        }),
        _ => None,
    };
    record.stats = serde_json::from_str(&raw.stats)
        .with_context(|| format!("match {}: decode stats", record.match_id))?;
    record.prematch = serde_json::from_str(&raw.prematch)
        .with_context(|| format!("match {}: decode pre-match fields", record.match_id))?;
    record.odds = serde_json::from_str(&raw.odds)
        .with_context(|| format!("match {}: decode odds", record.match_id))?;
    Ok(record)
}

impl MatchStore for SqliteMatchStore {
    fn load_matches(&self, league: Option<u32>, season: Option<u32>) -> Result<Vec<MatchRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT
                    match_id, league_id, season_id, kickoff_unix, game_week,
                    home_team_id, away_team_id, home_team, away_team,
                    home_goals, away_goals, stats_json, prematch_json, odds_json
                FROM matches
                WHERE (?1 IS NULL OR league_id = ?1)
                  AND (?2 IS NULL OR season_id = ?2)
                ORDER BY kickoff_unix ASC, match_id ASC
                "#,
            )
            .context("prepare load matches query")?;

        let rows = stmt
            .query_map(
                params![league.map(|v| v as i64), season.map(|v| v as i64)],
                |row| {
                    Ok(RawMatch {
                        record: MatchRecord {
                            match_id: row.get::<_, i64>(0)? as u64,
                            league_id: row.get::<_, u32>(1)?,
                            season_id: row.get::<_, u32>(2)?,
                            kickoff_unix: row.get(3)?,
                            game_week: row.get(4)?,
                            home_team_id: row.get::<_, u32>(5)?,
                            away_team_id: row.get::<_, u32>(6)?,
                            home_team: row.get(7)?,
                            away_team: row.get(8)?,
                            score: None,
                            stats: Default::default(),
                            prematch: Default::default(),
                            odds: Default::default(),
                        },
                        home_goals: row.get(9)?,
                        away_goals: row.get(10)?,
                        stats: row.get(11)?,
                        prematch: row.get(12)?,
                        odds: row.get(13)?,
                    })
                },
            )
            .context("query load matches")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(decode(row.context("decode match row")?)?);
        }
        Ok(out)
    }

    fn load_seasons(&self, league: Option<u32>) -> Result<Vec<Season>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT season_id, league_id, label, start_unix
                FROM seasons
                WHERE (?1 IS NULL OR league_id = ?1)
                ORDER BY league_id ASC, start_unix ASC, season_id ASC
                "#,
            )
            .context("prepare load seasons query")?;
        let rows = stmt
            .query_map(params![league.map(|v| v as i64)], |row| {
                Ok(Season {
                    season_id: row.get::<_, u32>(0)?,
                    league_id: row.get::<_, u32>(1)?,
                    label: row.get(2)?,
                    start_unix: row.get(3)?,
                })
            })
            .context("query load seasons")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("decode season row")?);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryMatchStore {
    pub matches: Vec<MatchRecord>,
    pub seasons: Vec<Season>,
}

impl MemoryMatchStore {
    pub fn new(matches: Vec<MatchRecord>, seasons: Vec<Season>) -> Self {
        Self { matches, seasons }
    }
}

impl MatchStore for MemoryMatchStore {
    fn load_matches(&self, league: Option<u32>, season: Option<u32>) -> Result<Vec<MatchRecord>> {
        let mut out: Vec<MatchRecord> = self
            .matches
            .iter()
            .filter(|m| league.is_none_or(|id| m.league_id == id))
            .filter(|m| season.is_none_or(|id| m.season_id == id))
            .cloned()
            .collect();
        match_data::sort_chronologically(&mut out);
        Ok(out)
    }

    fn load_seasons(&self, league: Option<u32>) -> Result<Vec<Season>> {
        Ok(self
            .seasons
            .iter()
            .filter(|s| league.is_none_or(|id| s.league_id == id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_data::OddsQuote;

    fn record(id: u64, ts: i64, score: Option<(u8, u8)>) -> MatchRecord {
        MatchRecord {
            match_id: id,
            league_id: 47,
            season_id: 2023,
            kickoff_unix: ts,
            game_week: Some(1),
            home_team_id: 1,
            away_team_id: 2,
            home_team: "Home".into(),
            away_team: "Away".into(),
            score: score.map(|(h, a)| FinalScore {
                home_goals: h,
                away_goals: a,
            }),
            stats: Default::default(),
            prematch: Default::default(),
            odds: OddsQuote {
                home: Some(2.1),
                draw: Some(3.4),
                away: Some(3.6),
                ..OddsQuote::default()
            },
        }
    }

    #[test]
    fn sqlite_round_trip_keeps_order_and_fields() {
        let mut store = SqliteMatchStore::open_in_memory().unwrap();
        let season = Season {
            season_id: 2023,
            league_id: 47,
            label: "2023/2024".into(),
            start_unix: Some(0),
        };
        let summary = store
            .import(&[season.clone()], &[record(2, 200, None), record(1, 100, Some((2, 1)))])
            .unwrap();
        assert_eq!(summary.matches_upserted, 2);
        assert_eq!(summary.completed, 1);

        let loaded = store.load_matches(Some(47), None).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].match_id, 1);
        assert_eq!(loaded[0].score.unwrap().home_goals, 2);
        assert_eq!(loaded[0].odds.draw, Some(3.4));
        assert!(loaded[1].score.is_none());

        assert_eq!(store.load_seasons(None).unwrap(), vec![season]);
        assert!(store.load_matches(Some(99), None).unwrap().is_empty());
        assert!(store.last_import_at().unwrap().is_some());
    }

    #[test]
    fn upsert_replaces_existing_rows() {
        let mut store = SqliteMatchStore::open_in_memory().unwrap();
        store.import(&[], &[record(1, 100, None)]).unwrap();
        store.import(&[], &[record(1, 100, Some((0, 0)))]).unwrap();
        assert_eq!(store.match_count().unwrap(), 1);
        let loaded = store.load_matches(None, None).unwrap();
        assert!(loaded[0].score.is_some());
    }
}
