//! signalbot: rule-based trading signals, backtests and a live scanner.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
#[cfg(feature = "scanner")]
pub mod scanner;
