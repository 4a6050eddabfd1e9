//! Domain error types.

use chrono::NaiveDate;

/// A parse error with position information for condition parsing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Top-level error type for signalbot.
#[derive(Debug, thiserror::Error)]
pub enum SignalbotError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    RuleParse(#[from] ParseError),

    /// Invalid rule or strategy definition, rejected before evaluation.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("data source error: {reason}")]
    DataSource { reason: String },

    #[error("no data for {symbol}")]
    NoData { symbol: String },

    /// The latest bar predates the evaluation date.
    #[error("stale data for {symbol}: last bar {last}, evaluating {as_of}")]
    StaleData {
        symbol: String,
        last: NaiveDate,
        as_of: NaiveDate,
    },

    /// Not enough history to compute a required indicator on a given date.
    #[error("insufficient history for {symbol} on {date}: {reason}")]
    DataGap {
        symbol: String,
        date: NaiveDate,
        reason: String,
    },

    /// Corrupt input that makes a replay meaningless; the run is aborted.
    #[error("simulation failed: {reason}")]
    SimulationFailure { reason: String },

    #[error("portfolio error: {reason}")]
    Portfolio { reason: String },

    #[error("scanner error: {reason}")]
    Scanner { reason: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SignalbotError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        SignalbotError::Configuration {
            reason: reason.into(),
        }
    }

    pub fn invalid(section: &str, key: &str, reason: impl Into<String>) -> Self {
        SignalbotError::ConfigInvalid {
            section: section.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn missing(section: &str, key: &str) -> Self {
        SignalbotError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }
    }
}

impl From<&SignalbotError> for std::process::ExitCode {
    fn from(err: &SignalbotError) -> Self {
        let code: u8 = match err {
            SignalbotError::Io(_) | SignalbotError::Csv(_) | SignalbotError::Json(_) => 1,
            SignalbotError::ConfigParse { .. }
            | SignalbotError::ConfigMissing { .. }
            | SignalbotError::ConfigInvalid { .. } => 2,
            SignalbotError::DataSource { .. } => 3,
            SignalbotError::RuleParse(_) | SignalbotError::Configuration { .. } => 4,
            SignalbotError::NoData { .. }
            | SignalbotError::StaleData { .. }
            | SignalbotError::DataGap { .. } => 5,
            SignalbotError::SimulationFailure { .. } => 6,
            SignalbotError::Portfolio { .. } | SignalbotError::Scanner { .. } => 7,
        };
        std::process::ExitCode::from(code)
    }
}
