use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::backtest::{BacktestConfig, StakePolicy};
use crate::features::{FeatureConfig, FormSeasonPolicy};
use crate::split::SplitConfig;
use crate::staking::StakeConfig;

const CACHE_DIR: &str = "matchedge";
const DB_FILE: &str = "matches.sqlite";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub features: FeatureConfig,
    pub split: SplitConfig,
    pub staking: StakeConfig,
    pub backtest: BacktestConfig,
    /// Extra `min_edge` values replayed over the same predictions.
    pub min_edge_sweep: Vec<f64>,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by `MATCHEDGE_*` values from `lookup`. Unparseable
    /// values fall back to the default; numeric values are clamped.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        let usize_var = |key: &str| lookup(key).and_then(|v| v.trim().parse::<usize>().ok());
        let f64_var = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite())
        };

        if let Some(v) = usize_var("MATCHEDGE_FORM_WINDOW") {
            cfg.features.form_window = v.clamp(1, 38);
        }
        if let Some(v) = usize_var("MATCHEDGE_VENUE_WINDOW") {
            cfg.features.venue_window = v.clamp(1, 19);
        }
        if let Some(v) = usize_var("MATCHEDGE_H2H_WINDOW") {
            cfg.features.h2h_window = v.clamp(1, 20);
        }
        if let Some(v) = usize_var("MATCHEDGE_MIN_HISTORY") {
            cfg.features.min_history = v.clamp(1, 38);
        }
        if let Some(v) = lookup("MATCHEDGE_FORM_SEASON_POLICY") {
            match v.trim().to_ascii_lowercase().as_str() {
                "reset" | "reset_at_season" => {
                    cfg.features.form_season_policy = FormSeasonPolicy::ResetAtSeason
                }
                "carry" | "carry_over" => cfg.features.form_season_policy = FormSeasonPolicy::CarryOver,
                _ => {}
            }
        }

        if let Some(v) = usize_var("MATCHEDGE_HOLDOUT_SEASONS") {
            cfg.split.holdout_seasons_per_league = v.clamp(1, 20);
        }
        if let Some(v) = usize_var("MATCHEDGE_MIN_TRAIN_SEASONS") {
            cfg.split.min_train_seasons = v.clamp(1, 20);
        }

        if let Some(v) = f64_var("MATCHEDGE_MIN_ODDS") {
            cfg.staking.min_odds = v.clamp(1.01, 100.0);
        }
        if let Some(v) = f64_var("MATCHEDGE_MAX_ODDS") {
            cfg.staking.max_odds = v.clamp(1.01, 1000.0);
        }
        if let Some(v) = f64_var("MATCHEDGE_MIN_EDGE") {
            cfg.staking.min_edge = v.clamp(0.0, 1.0);
        }
        if let Some(v) = f64_var("MATCHEDGE_KELLY_FRACTION") {
            cfg.staking.kelly_fraction = v.clamp(0.0, 1.0);
        }

        if let Some(v) = f64_var("MATCHEDGE_BANKROLL") {
            cfg.backtest.initial_bankroll = v.max(1.0);
        }
        match lookup("MATCHEDGE_STAKE_POLICY").as_deref().map(str::trim) {
            Some("kelly") => cfg.backtest.stake_policy = StakePolicy::Kelly,
            Some("flat") => {
                let units = f64_var("MATCHEDGE_FLAT_STAKE").unwrap_or(10.0).max(0.01);
                cfg.backtest.stake_policy = StakePolicy::Flat { units };
            }
            _ => {}
        }
        if let Some(v) = usize_var("MATCHEDGE_RESAMPLES") {
            cfg.backtest.resamples = v.clamp(0, 100_000);
        }
        if let Some(v) = lookup("MATCHEDGE_SEED").and_then(|v| v.trim().parse::<u64>().ok()) {
            cfg.backtest.seed = v;
        }
        if let Some(v) = lookup("MATCHEDGE_MIN_EDGE_SWEEP") {
            cfg.min_edge_sweep = parse_f64_list(&v);
        }
        cfg
    }
}

pub fn parse_f64_list(raw: &str) -> Vec<f64> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .collect()
}

/// `$MATCHEDGE_CACHE_DIR`, else the XDG cache dir, else `~/.cache/matchedge`.
pub fn app_cache_dir() -> Option<PathBuf> {
    if let Ok(dir) = env::var("MATCHEDGE_CACHE_DIR")
        && !dir.trim().is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    if let Ok(base) = env::var("XDG_CACHE_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(CACHE_DIR));
    }
    let home = env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR))
}

pub fn default_db_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("MATCHEDGE_DB_PATH")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }
    app_cache_dir().map(|dir| dir.join(DB_FILE))
}

pub fn feature_cache_dir() -> Option<PathBuf> {
    app_cache_dir().map(|dir| dir.join("features"))
}

pub fn load_dotenv() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
}

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,matchedge=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_are_parsed_and_clamped() {
        let cfg = EngineConfig::from_lookup(lookup(&[
            ("MATCHEDGE_FORM_WINDOW", "8"),
            ("MATCHEDGE_MIN_EDGE", "3.5"),
            ("MATCHEDGE_STAKE_POLICY", "kelly"),
            ("MATCHEDGE_FORM_SEASON_POLICY", "reset"),
            ("MATCHEDGE_MIN_EDGE_SWEEP", "0.02, 0.05 0.08"),
        ]));
        assert_eq!(cfg.features.form_window, 8);
        assert_eq!(cfg.staking.min_edge, 1.0);
        assert_eq!(cfg.backtest.stake_policy, StakePolicy::Kelly);
        assert_eq!(cfg.features.form_season_policy, FormSeasonPolicy::ResetAtSeason);
        assert_eq!(cfg.min_edge_sweep, vec![0.02, 0.05, 0.08]);
    }

    #[test]
    fn garbage_values_keep_defaults() {
        let cfg = EngineConfig::from_lookup(lookup(&[
            ("MATCHEDGE_HOLDOUT_SEASONS", "two"),
            ("MATCHEDGE_KELLY_FRACTION", "NaN"),
        ]));
        assert_eq!(cfg, EngineConfig::default());
    }
}
