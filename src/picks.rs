use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::features::{FeatureEngine, FeatureVector};
use crate::match_data::{FinalScore, MatchRecord};
use crate::pipeline::{market_inputs, select_candidates};
use crate::predictor::{FittedModel, Predictor};
use crate::progress::{CancelToken, NoProgress};
use crate::report::Diagnostics;
use crate::staking::BetCandidate;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuePick {
    pub home_team: String,
    pub away_team: String,
    pub candidate: BetCandidate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PicksReport {
    pub fixtures: usize,
    pub picks: Vec<ValuePick>,
    pub fit_errors: BTreeMap<u32, String>,
    pub diagnostics: Diagnostics,
}

/// Scores upcoming `fixtures` with one model per league, each fitted on every
/// completed match of that league in `history`. Picks are sorted by edge.
pub fn value_picks<P: Predictor>(
    history: Vec<MatchRecord>,
    fixtures: &[MatchRecord],
    predictor: &P,
    cfg: &EngineConfig,
    cancel: &CancelToken,
) -> Result<PicksReport, EngineError> {
    let engine = FeatureEngine::new(history, cfg.features);
    let table = engine.generate_table(&NoProgress, cancel)?;

    let mut report = PicksReport {
        fixtures: fixtures.len(),
        ..PicksReport::default()
    };
    let leagues: BTreeSet<u32> = fixtures.iter().map(|f| f.league_id).collect();
    for league_id in leagues {
        cancel.check()?;
        let mut rows: Vec<&FeatureVector> = Vec::new();
        let mut labels: Vec<FinalScore> = Vec::new();
        for (m, row) in engine.matches().iter().zip(&table.rows) {
            if m.league_id != league_id || row.is_cold_start() {
                continue;
            }
            if let Some(score) = m.score {
                rows.push(row);
                labels.push(score);
            }
        }

        let model = match predictor.fit(&rows, &labels) {
            Ok(model) => model,
            Err(err) => {
                warn!(league_id, error = %err, "no model for league; its fixtures are skipped");
                report.diagnostics.fit_failures += 1;
                report.fit_errors.insert(league_id, err.to_string());
                continue;
            }
        };

        for fixture in fixtures.iter().filter(|f| f.league_id == league_id && !f.is_completed()) {
            // Live path: same computation as the table, history strictly before kickoff.
            let row = engine.features_for(fixture);
            if row.is_cold_start() {
                report.diagnostics.cold_start_skipped += 1;
                continue;
            }
            let probs = match model.predict_proba(&row) {
                Ok(probs) => probs,
                Err(err) => {
                    report.diagnostics.record_predictor_error(fixture.match_id, &err);
                    continue;
                }
            };
            let inputs = market_inputs(fixture, &probs, &mut report.diagnostics);
            for candidate in select_candidates(&inputs, &cfg.staking, &mut report.diagnostics) {
                report.picks.push(ValuePick {
                    home_team: fixture.home_team.clone(),
                    away_team: fixture.away_team.clone(),
                    candidate,
                });
            }
        }
    }

    report
        .picks
        .sort_by(|a, b| b.candidate.edge.total_cmp(&a.candidate.edge));
    info!(fixtures = report.fixtures, picks = report.picks.len(), "value picks ready");
    Ok(report)
}
