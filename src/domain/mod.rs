//! Core domain types and logic.

pub mod ohlcv;
pub mod indicator;
pub mod snapshot;
pub mod condition;
pub mod condition_parser;
pub mod rule;
pub mod scorer;
pub mod composite;
pub mod signal;
pub mod evaluator;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod metrics;
pub mod backtest;
pub mod live;
pub mod market_hours;
pub mod universe;
pub mod config_validation;
pub mod error;
