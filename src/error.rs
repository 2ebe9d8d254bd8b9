use serde::Serialize;
use thiserror::Error;

/// A windowed aggregate had too little history. Always recovered in place by
/// the feature engine (sentinel value plus a cold-start flag).
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("only {available} of {required} history matches before cutoff")]
pub struct InsufficientHistoryError {
    pub available: usize,
    pub required: usize,
}

#[derive(Debug, Clone, Error, PartialEq, Serialize)]
pub enum GuardrailError {
    #[error("league {league_id}: no seasons with matches")]
    NoSeasons { league_id: u32 },

    #[error(
        "league {league_id}: {available} season(s) stored, {holdout} held out, needs {min_train} train season(s)"
    )]
    InsufficientTrainSeasons {
        league_id: u32,
        available: usize,
        holdout: usize,
        min_train: usize,
    },

    #[error(
        "league {league_id}: train window ends at {train_max} but holdout starts at {holdout_min}"
    )]
    TemporalOverlap {
        league_id: u32,
        train_max: i64,
        holdout_min: i64,
    },
}

impl GuardrailError {
    pub fn league_id(&self) -> u32 {
        match self {
            GuardrailError::NoSeasons { league_id }
            | GuardrailError::InsufficientTrainSeasons { league_id, .. }
            | GuardrailError::TemporalOverlap { league_id, .. } => *league_id,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvalidOddsError {
    #[error("odds {value} must be greater than 1.0")]
    NotAboveEven { value: f64 },

    #[error("odds value is not finite")]
    NotFinite,

    #[error("market needs at least 2 outcomes, got {count}")]
    TooFewOutcomes { count: usize },

    #[error("market price missing")]
    Missing,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PredictorError {
    #[error("not enough training rows: {got} < {needed}")]
    NotEnoughTrainingRows { needed: usize, got: usize },

    #[error("feature rows ({rows}) and labels ({labels}) differ in length")]
    LabelMismatch { rows: usize, labels: usize },

    #[error("feature {0} is not finite")]
    NonFiniteFeature(&'static str),

    #[error("model produced invalid probabilities: {0}")]
    InvalidOutput(String),

    #[error("model failure: {0}")]
    Model(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Guardrail(#[from] GuardrailError),

    #[error("no matches loaded from the match store")]
    EmptyDataset,

    #[error("simulator has already run")]
    SimulatorSpent,
}
