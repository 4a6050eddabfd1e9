//! The single evaluation path shared by backtests and the live scanner.
//!
//! [`signal_at`] turns one cached snapshot into a [`Signal`]. [`evaluate`] and
//! [`evaluate_universe`] build the cache from raw history first, so a live
//! evaluation on date `d` matches the backtest bar for `d` exactly.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::composite::CompositeStrategy;
use crate::domain::error::SignalbotError;
use crate::domain::indicator::IndicatorKind;
use crate::domain::ohlcv::{history_until, validate_series, PriceBar};
use crate::domain::rule::Rule;
use crate::domain::scorer::{score_rule, DEFAULT_CORROBORATION_BONUS};
use crate::domain::signal::{price_levels, rank_signals, Signal, SignalSource};
use crate::domain::snapshot::{IndicatorCache, IndicatorSnapshot, SymbolData};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Strategy {
    Rule(Rule),
    Composite(CompositeStrategy),
}

impl Strategy {
    pub fn id(&self) -> &str {
        match self {
            Strategy::Rule(rule) => &rule.id,
            Strategy::Composite(c) => &c.name,
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            Strategy::Rule(rule) => rule.active,
            Strategy::Composite(_) => true,
        }
    }

    pub fn validate(&self) -> Result<(), SignalbotError> {
        match self {
            Strategy::Rule(rule) => rule.validate(),
            Strategy::Composite(c) => c.validate(),
        }
    }

    pub fn required_indicators(&self) -> BTreeSet<IndicatorKind> {
        match self {
            Strategy::Rule(rule) => rule.required_indicators(),
            Strategy::Composite(c) => c.required_indicators(),
        }
    }

    /// Kinds whose absence on a bar makes the bar unusable. Cross-sectional
    /// kinds are excluded; they depend on the evaluated universe.
    pub fn warmup_indicators(&self) -> BTreeSet<IndicatorKind> {
        self.required_indicators()
            .into_iter()
            .filter(|k| !k.is_cross_sectional())
            .collect()
    }

    /// Bars of history needed before the first usable bar.
    pub fn lookback_bars(&self) -> usize {
        self.required_indicators()
            .iter()
            .map(|k| k.required_bars())
            .max()
            .unwrap_or(1)
    }

    pub fn source(&self) -> SignalSource {
        match self {
            Strategy::Rule(rule) => SignalSource::Rule(rule.id.clone()),
            Strategy::Composite(c) => SignalSource::Composite(c.name.clone()),
        }
    }
}

/// Score already-computed snapshots.
pub fn signal_from_snapshot(
    strategy: &Strategy,
    current: &IndicatorSnapshot,
    previous: Option<&IndicatorSnapshot>,
    close: f64,
    volume: i64,
) -> Signal {
    let (classification, score, strength, confidence, fired, reasons, target_pct, stop_pct) =
        match strategy {
            Strategy::Rule(rule) => {
                let rs = score_rule(rule, current, previous, DEFAULT_CORROBORATION_BONUS);
                (
                    rs.classification,
                    rs.score,
                    rs.strength,
                    rs.confidence,
                    rs.direction.filter(|_| rs.fired),
                    rs.reasons,
                    rule.target_pct,
                    rule.stop_loss_pct,
                )
            }
            Strategy::Composite(c) => {
                let cs = c.score(current, previous);
                (
                    cs.classification,
                    cs.score,
                    cs.strength,
                    cs.confidence,
                    cs.direction.filter(|_| cs.fired),
                    cs.reasons,
                    c.target_pct,
                    c.stop_loss_pct,
                )
            }
        };

    let (target_price, stop_loss_price) = price_levels(close, fired, target_pct, stop_pct);

    Signal {
        symbol: current.symbol.clone(),
        source: strategy.source(),
        as_of: current.date,
        classification,
        score,
        strength,
        confidence,
        fired,
        close,
        target_price,
        stop_loss_price,
        reasons,
        liquidity: close * volume as f64,
    }
}

/// Signal for the bar at `index`, or `DataGap` when a required indicator is
/// still warming up on that bar.
pub fn signal_at(
    strategy: &Strategy,
    data: &SymbolData,
    index: usize,
    warmup: &BTreeSet<IndicatorKind>,
) -> Result<Signal, SignalbotError> {
    let bar = data.bars.get(index).ok_or_else(|| SignalbotError::NoData {
        symbol: data.symbol.clone(),
    })?;
    let (current, previous) = data.snapshot_pair(index);

    let missing = current.missing(warmup);
    if !missing.is_empty() {
        let names: Vec<String> = missing.iter().map(|k| k.to_string()).collect();
        return Err(SignalbotError::DataGap {
            symbol: data.symbol.clone(),
            date: bar.date,
            reason: format!("{} unavailable", names.join(", ")),
        });
    }

    Ok(signal_from_snapshot(
        strategy,
        current,
        previous,
        bar.close,
        bar.volume,
    ))
}

/// Evaluate one instrument as of `as_of`, using only bars dated on or
/// before it. Cross-sectional indicators are absent in this mode.
pub fn evaluate(
    history: &[PriceBar],
    symbol: &str,
    as_of: NaiveDate,
    strategy: &Strategy,
) -> Result<Signal, SignalbotError> {
    strategy.validate()?;
    validate_series(symbol, history)?;

    let bars = history_until(history, as_of);
    if bars.is_empty() {
        return Err(SignalbotError::NoData {
            symbol: symbol.to_string(),
        });
    }

    let data = SymbolData::new(symbol.to_string(), bars.to_vec(), &strategy.required_indicators());
    signal_at(strategy, &data, data.bar_count() - 1, &strategy.warmup_indicators())
}

#[derive(Debug, Default)]
pub struct UniverseEvaluation {
    /// Ranked most bullish first.
    pub signals: Vec<Signal>,
    /// Symbols that could not be evaluated, with the reason.
    pub skipped: Vec<(String, SignalbotError)>,
}

/// Evaluate every instrument as of `as_of`, ranking cross-sectional
/// indicators across the whole set.
///
/// Only instruments with a bar dated `as_of` produce a signal; the rest are
/// skipped as stale.
pub fn evaluate_universe(
    histories: &BTreeMap<String, Vec<PriceBar>>,
    as_of: NaiveDate,
    strategy: &Strategy,
) -> Result<UniverseEvaluation, SignalbotError> {
    strategy.validate()?;
    let kinds = strategy.required_indicators();
    let warmup = strategy.warmup_indicators();

    let mut result = UniverseEvaluation::default();
    let mut cache = IndicatorCache::new();
    for (symbol, history) in histories {
        if let Err(err) = validate_series(symbol, history) {
            result.skipped.push((symbol.clone(), err));
            continue;
        }
        let bars = history_until(history, as_of);
        if bars.is_empty() {
            result.skipped.push((
                symbol.clone(),
                SignalbotError::NoData {
                    symbol: symbol.clone(),
                },
            ));
            continue;
        }
        cache.insert(symbol, bars.to_vec(), &kinds);
    }
    cache.apply_ranks(&kinds);

    for data in cache.iter() {
        let last = data.bars[data.bar_count() - 1].date;
        if last != as_of {
            result.skipped.push((
                data.symbol.clone(),
                SignalbotError::StaleData {
                    symbol: data.symbol.clone(),
                    last,
                    as_of,
                },
            ));
            continue;
        }
        match signal_at(strategy, data, data.bar_count() - 1, &warmup) {
            Ok(signal) => result.signals.push(signal),
            Err(err) => result.skipped.push((data.symbol.clone(), err)),
        }
    }

    rank_signals(&mut result.signals);
    Ok(result)
}
