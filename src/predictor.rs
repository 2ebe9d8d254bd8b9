//! Model contract consumed by the pipeline, plus the Poisson reference model.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calibration::{self, Outcome, Prob3, ScoreGrid};
use crate::error::PredictorError;
use crate::features::{Feature, FeatureVector};
use crate::match_data::{FinalScore, Market};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeProbs {
    pub result: Prob3,
    pub over25: Option<f64>,
    pub over15: Option<f64>,
    pub btts: Option<f64>,
}

impl OutcomeProbs {
    pub fn prob_for(&self, market: Market) -> Option<f64> {
        match market {
            Market::Home => Some(self.result.home),
            Market::Draw => Some(self.result.draw),
            Market::Away => Some(self.result.away),
            Market::Over25 => self.over25,
            Market::Under25 => self.over25.map(|p| 1.0 - p),
            Market::Over15 => self.over15,
            Market::Under15 => self.over15.map(|p| 1.0 - p),
            Market::BttsYes => self.btts,
            Market::BttsNo => self.btts.map(|p| 1.0 - p),
        }
    }

    pub fn validate(&self) -> Result<(), PredictorError> {
        if !self.result.is_valid() {
            return Err(PredictorError::InvalidOutput(format!(
                "1X2 probabilities {:.4}/{:.4}/{:.4}",
                self.result.home, self.result.draw, self.result.away
            )));
        }
        for p in [self.over25, self.over15, self.btts].into_iter().flatten() {
            if !p.is_finite() || !(0.0..=1.0).contains(&p) {
                return Err(PredictorError::InvalidOutput(format!("binary probability {p}")));
            }
        }
        Ok(())
    }
}

pub trait Predictor: Sync {
    type Model: FittedModel;

    fn fit(&self, rows: &[&FeatureVector], labels: &[FinalScore]) -> Result<Self::Model, PredictorError>;
}

pub trait FittedModel: Send + Sync {
    fn predict_proba(&self, row: &FeatureVector) -> Result<OutcomeProbs, PredictorError>;
}

// Features the reference model reads. Every one must be finite on input.
const SIGNAL_FEATURES: [Feature; 5] = [
    Feature::FormPpgDiff,
    Feature::VenuePpgDiff,
    Feature::HomeFormGoalDiff,
    Feature::AwayFormGoalDiff,
    Feature::XgDiff,
];

fn strength_signal(row: &FeatureVector) -> Result<f64, PredictorError> {
    for f in SIGNAL_FEATURES {
        if !row.get(f).is_finite() {
            return Err(PredictorError::NonFiniteFeature(f.name()));
        }
    }
    let gd_diff = row.get(Feature::HomeFormGoalDiff) - row.get(Feature::AwayFormGoalDiff);
    Ok(0.45 * row.get(Feature::FormPpgDiff)
        + 0.25 * row.get(Feature::VenuePpgDiff)
        + 0.20 * gd_diff
        + 0.10 * row.get(Feature::XgDiff))
}

/// Dixon-Coles Poisson model whose goal rates tilt with a form signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoissonGoalsPredictor {
    pub min_rows: usize,
    pub max_goals: u32,
    pub shrink_matches: f64,
}

impl Default for PoissonGoalsPredictor {
    fn default() -> Self {
        Self {
            min_rows: 30,
            max_goals: 10,
            shrink_matches: 200.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoissonModel {
    pub samples: usize,
    pub goals_total_base: f64,
    pub home_adv_goals: f64,
    pub signal_weight: f64,
    pub dc_rho: f64,
    pub logit_scale: f64,
    pub draw_bias: f64,
    pub max_goals: u32,
    pub train_metrics: calibration::Metrics,
}

impl PoissonModel {
    fn raw_grid(&self, signal: f64) -> ScoreGrid {
        lambdas_grid(
            self.goals_total_base,
            self.home_adv_goals,
            self.signal_weight,
            signal,
            self.max_goals,
            self.dc_rho,
        )
    }
}

fn lambdas_grid(base: f64, adv: f64, weight: f64, signal: f64, max_goals: u32, rho: f64) -> ScoreGrid {
    let tilt = (weight * signal).clamp(-1.5, 1.5);
    let lambda_home = ((base + adv) / 2.0 * tilt.exp()).clamp(0.20, 3.80);
    let lambda_away = ((base - adv) / 2.0 * (-tilt).exp()).clamp(0.20, 3.80);
    ScoreGrid::new(lambda_home, lambda_away, max_goals, rho)
}

impl Predictor for PoissonGoalsPredictor {
    type Model = PoissonModel;

    fn fit(&self, rows: &[&FeatureVector], labels: &[FinalScore]) -> Result<PoissonModel, PredictorError> {
        if rows.len() != labels.len() {
            return Err(PredictorError::LabelMismatch {
                rows: rows.len(),
                labels: labels.len(),
            });
        }
        if rows.len() < self.min_rows {
            return Err(PredictorError::NotEnoughTrainingRows {
                needed: self.min_rows,
                got: rows.len(),
            });
        }

        let signals = rows
            .iter()
            .map(|r| strength_signal(r))
            .collect::<Result<Vec<_>, _>>()?;
        let outcomes: Vec<Outcome> = labels.iter().map(|s| s.outcome()).collect();

        let n = labels.len() as f64;
        let total: f64 = labels.iter().map(|s| s.total_goals() as f64).sum();
        let diff: f64 = labels
            .iter()
            .map(|s| s.home_goals as f64 - s.away_goals as f64)
            .sum();

        // Small samples lean on typical league values.
        let w = (n / self.shrink_matches).clamp(0.0, 1.0);
        let goals_total_base = (1.0 - w) * 2.60 + w * (total / n);
        let home_adv_goals = (1.0 - w) * 0.25 + w * (diff / n);

        let draw_rate = calibration::empirical_outcome_probs(&outcomes).draw;
        let dc_rho = calibration::fit_dc_rho_to_draw_rate(goals_total_base, home_adv_goals, draw_rate);

        let mut best_weight = 0.0;
        let mut best_loss = f64::INFINITY;
        for step in 0..=30 {
            let weight = step as f64 * 0.02;
            let preds: Vec<Prob3> = signals
                .iter()
                .map(|s| {
                    lambdas_grid(goals_total_base, home_adv_goals, weight, *s, self.max_goals, dc_rho)
                        .outcome_probs()
                })
                .collect();
            let loss = calibration::evaluate_probs(&preds, &outcomes).log_loss;
            if loss < best_loss {
                best_loss = loss;
                best_weight = weight;
            }
        }

        let raw: Vec<Prob3> = signals
            .iter()
            .map(|s| {
                lambdas_grid(goals_total_base, home_adv_goals, best_weight, *s, self.max_goals, dc_rho)
                    .outcome_probs()
            })
            .collect();
        let (logit_scale, draw_bias, train_metrics) = calibration::fit_logit_calibration(&raw, &outcomes);

        let model = PoissonModel {
            samples: labels.len(),
            goals_total_base,
            home_adv_goals,
            signal_weight: best_weight,
            dc_rho,
            logit_scale,
            draw_bias,
            max_goals: self.max_goals,
            train_metrics,
        };
        debug!(
            samples = model.samples,
            weight = model.signal_weight,
            rho = model.dc_rho,
            log_loss = model.train_metrics.log_loss,
            "poisson model fitted"
        );
        Ok(model)
    }
}

impl FittedModel for PoissonModel {
    fn predict_proba(&self, row: &FeatureVector) -> Result<OutcomeProbs, PredictorError> {
        let grid = self.raw_grid(strength_signal(row)?);
        let result = calibration::apply_logit_calibration(grid.outcome_probs(), self.logit_scale, self.draw_bias);
        let probs = OutcomeProbs {
            result,
            over25: Some(grid.over(2.5)),
            over15: Some(grid.over(1.5)),
            btts: Some(grid.both_score()),
        };
        probs.validate()?;
        Ok(probs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_complements_are_derived() {
        let probs = OutcomeProbs {
            result: Prob3::uniform(),
            over25: Some(0.55),
            over15: None,
            btts: Some(0.40),
        };
        assert!((probs.prob_for(Market::Under25).unwrap() - 0.45).abs() < 1e-12);
        assert!(probs.prob_for(Market::Under15).is_none());
        assert!((probs.prob_for(Market::BttsNo).unwrap() - 0.60).abs() < 1e-12);
    }

    #[test]
    fn invalid_output_is_typed() {
        let probs = OutcomeProbs {
            result: Prob3 {
                home: 0.9,
                draw: 0.9,
                away: 0.9,
            },
            over25: None,
            over15: None,
            btts: None,
        };
        assert!(matches!(probs.validate(), Err(PredictorError::InvalidOutput(_))));
    }

    #[test]
    fn fit_rejects_short_training_sets() {
        let err = PoissonGoalsPredictor::default().fit(&[], &[]).unwrap_err();
        assert_eq!(err, PredictorError::NotEnoughTrainingRows { needed: 30, got: 0 });
    }
}
