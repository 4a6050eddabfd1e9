//! Configuration validation.
//!
//! Each INI section is read into a typed settings struct and validated at
//! load, so nothing downstream re-checks ranges. Missing optional keys take
//! their defaults; present but unparseable values are `ConfigInvalid`.

use chrono::{NaiveDate, NaiveTime};
use std::path::PathBuf;

use crate::domain::composite::{CompositeStrategy, CompositeWeights};
use crate::domain::error::SignalbotError;
use crate::domain::execution::ExecutionConfig;
use crate::domain::market_hours::MarketHours;
use crate::domain::rule::{Rule, StrategyFamily};
use crate::domain::scorer::DEFAULT_CORROBORATION_BONUS;
use crate::domain::universe::parse_symbols;
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_WARMUP_DAYS: i64 = 120;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestSettings {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub symbols: Vec<String>,
    pub initial_capital: f64,
    pub execution: ExecutionConfig,
    pub risk_free_rate: f64,
    /// Calendar days of history loaded before `start_date`.
    pub warmup_days: i64,
    pub data_dir: Option<PathBuf>,
}

impl BacktestSettings {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, SignalbotError> {
        const S: &str = "backtest";

        let start_date = read_date(config, S, "start_date")?;
        let end_date = read_date(config, S, "end_date")?;
        if start_date >= end_date {
            return Err(SignalbotError::invalid(
                S,
                "start_date",
                "start_date must be before end_date",
            ));
        }

        let symbols = match config.get_string(S, "symbols") {
            Some(s) if !s.trim().is_empty() => parse_symbols(&s)?,
            _ => return Err(SignalbotError::missing(S, "symbols")),
        };

        let initial_capital = read_f64(config, S, "initial_capital", 0.0)?;
        if !(initial_capital > 0.0) {
            return Err(SignalbotError::invalid(
                S,
                "initial_capital",
                "initial_capital must be positive",
            ));
        }

        let execution = read_execution(config, S)?;

        let risk_free_rate = read_f64(config, S, "risk_free_rate", 0.0)?;
        if !(0.0..1.0).contains(&risk_free_rate) {
            return Err(SignalbotError::invalid(
                S,
                "risk_free_rate",
                "risk_free_rate must be between 0 and 1",
            ));
        }

        let warmup_days = read_i64(config, S, "warmup_days", DEFAULT_WARMUP_DAYS)?;
        if warmup_days < 0 {
            return Err(SignalbotError::invalid(
                S,
                "warmup_days",
                "warmup_days must be non-negative",
            ));
        }

        let data_dir = config
            .get_string(S, "data_dir")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(BacktestSettings {
            start_date,
            end_date,
            symbols,
            initial_capital,
            execution,
            risk_free_rate,
            warmup_days,
            data_dir,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeSettings {
    pub name: String,
    pub weights: CompositeWeights,
    pub target_pct: f64,
    pub stop_loss_pct: f64,
    pub corroboration_bonus: f64,
}

impl Default for CompositeSettings {
    fn default() -> Self {
        CompositeSettings {
            name: "default".to_string(),
            weights: CompositeWeights::default(),
            target_pct: 10.0,
            stop_loss_pct: 5.0,
            corroboration_bonus: DEFAULT_CORROBORATION_BONUS,
        }
    }
}

impl CompositeSettings {
    /// Reads `[composite]`. An absent section yields the defaults.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, SignalbotError> {
        const S: &str = "composite";
        let defaults = CompositeSettings::default();

        let weights = match config.get_string(S, "weights") {
            Some(raw) if !raw.trim().is_empty() => parse_weights(&raw)?,
            _ => defaults.weights,
        };

        let settings = CompositeSettings {
            name: config.get_string(S, "name").unwrap_or(defaults.name),
            weights,
            target_pct: read_f64(config, S, "target_pct", defaults.target_pct)?,
            stop_loss_pct: read_f64(config, S, "stop_loss_pct", defaults.stop_loss_pct)?,
            corroboration_bonus: read_f64(
                config,
                S,
                "corroboration_bonus",
                defaults.corroboration_bonus,
            )?,
        };

        settings
            .weights
            .validate()
            .map_err(|e| SignalbotError::invalid(S, "weights", e.to_string()))?;
        if !(settings.target_pct > 0.0) {
            return Err(SignalbotError::invalid(S, "target_pct", "target_pct must be positive"));
        }
        if !(settings.stop_loss_pct > 0.0 && settings.stop_loss_pct < 100.0) {
            return Err(SignalbotError::invalid(
                S,
                "stop_loss_pct",
                "stop_loss_pct must be within (0, 100)",
            ));
        }
        if !(0.0..=1.0).contains(&settings.corroboration_bonus) {
            return Err(SignalbotError::invalid(
                S,
                "corroboration_bonus",
                "corroboration_bonus must be within [0, 1]",
            ));
        }
        Ok(settings)
    }

    /// Blend `rules` (one per family) under these settings.
    pub fn build(&self, rules: Vec<Rule>) -> CompositeStrategy {
        let mut strategy = CompositeStrategy::new(&self.name, self.weights, rules);
        strategy.target_pct = self.target_pct;
        strategy.stop_loss_pct = self.stop_loss_pct;
        strategy.corroboration_bonus = self.corroboration_bonus;
        strategy
    }
}

/// `momentum:0.3, trend_following:0.35, ...`; unnamed families weigh 0.
pub fn parse_weights(raw: &str) -> Result<CompositeWeights, SignalbotError> {
    let mut weights = CompositeWeights {
        momentum: 0.0,
        trend_following: 0.0,
        mean_reversion: 0.0,
        breakout: 0.0,
    };

    for entry in raw.split(',') {
        let (name, value) = entry.split_once(':').ok_or_else(|| {
            SignalbotError::invalid(
                "composite",
                "weights",
                format!("expected family:weight, got '{}'", entry.trim()),
            )
        })?;
        let family: StrategyFamily = name
            .trim()
            .parse()
            .map_err(|e: String| SignalbotError::invalid("composite", "weights", e))?;
        let value: f64 = value.trim().parse().map_err(|_| {
            SignalbotError::invalid(
                "composite",
                "weights",
                format!("'{}' is not a number", value.trim()),
            )
        })?;
        let slot = match family {
            StrategyFamily::Momentum => &mut weights.momentum,
            StrategyFamily::TrendFollowing => &mut weights.trend_following,
            StrategyFamily::MeanReversion => &mut weights.mean_reversion,
            StrategyFamily::Breakout => &mut weights.breakout,
            StrategyFamily::Custom => {
                return Err(SignalbotError::invalid(
                    "composite",
                    "weights",
                    "custom rules cannot be weighted",
                ));
            }
        };
        *slot = value;
    }

    Ok(weights)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannerSettings {
    pub interval_secs: u64,
    pub market_hours: MarketHours,
    pub confidence_threshold: f64,
    /// Calendar days of history fetched for each evaluation.
    pub lookback_days: i64,
    pub initial_capital: f64,
    pub execution: ExecutionConfig,
    /// Restricts the scan; every listed symbol when `None`.
    pub symbols: Option<Vec<String>>,
    pub trade_log: Option<PathBuf>,
}

impl ScannerSettings {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, SignalbotError> {
        const S: &str = "scanner";

        let interval_secs = read_i64(config, S, "interval_secs", 60)?;
        if interval_secs <= 0 {
            return Err(SignalbotError::invalid(
                S,
                "interval_secs",
                "interval_secs must be positive",
            ));
        }

        let defaults = MarketHours::default();
        let open = read_time(config, S, "market_open", defaults.open)?;
        let close = read_time(config, S, "market_close", defaults.close)?;
        let offset = read_i64(config, S, "utc_offset_hours", 9)?;
        let offset = i32::try_from(offset)
            .map_err(|_| SignalbotError::invalid(S, "utc_offset_hours", "out of range"))?;
        let market_hours = MarketHours::new(open, close, offset)?;

        let confidence_threshold = read_f64(config, S, "confidence_threshold", 0.7)?;
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(SignalbotError::invalid(
                S,
                "confidence_threshold",
                "confidence_threshold must be within [0, 1]",
            ));
        }

        let lookback_days = read_i64(config, S, "lookback_days", DEFAULT_LOOKBACK_DAYS)?;
        if lookback_days <= 0 {
            return Err(SignalbotError::invalid(
                S,
                "lookback_days",
                "lookback_days must be positive",
            ));
        }

        let initial_capital = read_f64(config, S, "initial_capital", 0.0)?;
        if !(initial_capital > 0.0) {
            return Err(SignalbotError::invalid(
                S,
                "initial_capital",
                "initial_capital must be positive",
            ));
        }

        let symbols = match config.get_string(S, "symbols") {
            Some(s) if !s.trim().is_empty() => Some(parse_symbols(&s)?),
            _ => None,
        };

        Ok(ScannerSettings {
            interval_secs: interval_secs as u64,
            market_hours,
            confidence_threshold,
            lookback_days,
            initial_capital,
            execution: read_execution(config, S)?,
            symbols,
            trade_log: config
                .get_string(S, "trade_log")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
}

impl LoggingSettings {
    const LEVELS: [&'static str; 5] = ["trace", "debug", "info", "warn", "error"];

    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, SignalbotError> {
        let level = config
            .get_string("logging", "level")
            .map(|l| l.trim().to_lowercase())
            .unwrap_or_else(|| "info".to_string());
        if !Self::LEVELS.contains(&level.as_str()) {
            return Err(SignalbotError::invalid(
                "logging",
                "level",
                format!("unknown level '{}'", level),
            ));
        }
        Ok(LoggingSettings { level })
    }
}

fn read_execution(
    config: &dyn ConfigPort,
    section: &str,
) -> Result<ExecutionConfig, SignalbotError> {
    let defaults = ExecutionConfig::default();

    let commission_rate = read_f64(config, section, "commission_rate", defaults.commission_rate)?;
    if !(0.0..1.0).contains(&commission_rate) {
        return Err(SignalbotError::invalid(
            section,
            "commission_rate",
            "commission_rate must be in [0, 1)",
        ));
    }

    let risk_per_trade = read_f64(config, section, "risk_per_trade", defaults.risk_per_trade)?;
    if !(risk_per_trade > 0.0 && risk_per_trade <= 1.0) {
        return Err(SignalbotError::invalid(
            section,
            "risk_per_trade",
            "risk_per_trade must be in (0, 1]",
        ));
    }

    Ok(ExecutionConfig {
        commission_rate,
        risk_per_trade,
    })
}

fn read_f64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, SignalbotError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => {
            let value: f64 = raw.trim().parse().map_err(|_| {
                SignalbotError::invalid(section, key, format!("'{}' is not a number", raw.trim()))
            })?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(SignalbotError::invalid(section, key, "must be finite"))
            }
        }
    }
}

fn read_i64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<i64, SignalbotError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            SignalbotError::invalid(section, key, format!("'{}' is not an integer", raw.trim()))
        }),
    }
}

fn read_date(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<NaiveDate, SignalbotError> {
    let raw = config
        .get_string(section, key)
        .ok_or_else(|| SignalbotError::missing(section, key))?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        SignalbotError::invalid(
            section,
            key,
            format!("invalid {} format, expected YYYY-MM-DD", key),
        )
    })
}

fn read_time(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: NaiveTime,
) -> Result<NaiveTime, SignalbotError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| {
            SignalbotError::invalid(section, key, format!("invalid {} format, expected HH:MM", key))
        }),
    }
}
