pub mod backtest;
pub mod calibration;
pub mod config;
pub mod error;
pub mod feature_cache;
pub mod features;
pub mod match_data;
pub mod odds;
pub mod picks;
pub mod pipeline;
pub mod predictor;
pub mod progress;
pub mod report;
pub mod split;
pub mod staking;
pub mod store;
pub mod worker;
