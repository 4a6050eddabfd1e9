//! Technical indicator implementations.
//!
//! This module provides types for representing indicator values and series:
//! - `IndicatorKind`: indicator identity + parameters (serves as map key)
//! - `IndicatorSeries`: values aligned one-to-one with the input bars, `None`
//!   while the lookback is not yet satisfied
//!
//! Every series is causal: the value at bar `i` depends only on bars `0..=i`,
//! so a truncated history yields bit-identical values up to its last bar.

pub mod ema;
pub mod macd;
pub mod momentum;
pub mod rank;
pub mod rsi;
pub mod sma;
pub mod volume;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::ohlcv::PriceBar;

pub use ema::calculate_ema;
pub use macd::{calculate_macd, MacdSeries};
pub use momentum::{calculate_price_change, calculate_relative_strength};
pub use rsi::calculate_rsi;
pub use sma::calculate_sma;
pub use volume::calculate_volume_ratio;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndicatorKind {
    Close,
    Volume,
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    MacdLine,
    MacdSignal,
    MacdHistogram,
    /// Percent return over the horizon, in bars.
    RelativeStrength(usize),
    /// Cross-sectional percentile of `RelativeStrength` among the universe.
    RsRank(usize),
    VolumeRatio(usize),
    PriceChange,
}

impl IndicatorKind {
    /// Number of bars needed before the first value exists.
    pub fn required_bars(&self) -> usize {
        match self {
            IndicatorKind::Close | IndicatorKind::Volume => 1,
            IndicatorKind::Sma(n) | IndicatorKind::Ema(n) => *n,
            IndicatorKind::Rsi(n) | IndicatorKind::VolumeRatio(n) => n + 1,
            IndicatorKind::RelativeStrength(h) | IndicatorKind::RsRank(h) => h + 1,
            IndicatorKind::MacdLine => macd::DEFAULT_SLOW,
            IndicatorKind::MacdSignal | IndicatorKind::MacdHistogram => {
                macd::DEFAULT_SLOW + macd::DEFAULT_SIGNAL - 1
            }
            IndicatorKind::PriceChange => 2,
        }
    }

    /// Cross-sectional kinds need the whole universe on a date, not one series.
    pub fn is_cross_sectional(&self) -> bool {
        matches!(self, IndicatorKind::RsRank(_))
    }

    pub fn is_macd(&self) -> bool {
        matches!(
            self,
            IndicatorKind::MacdLine | IndicatorKind::MacdSignal | IndicatorKind::MacdHistogram
        )
    }

    /// Window parameters must be positive.
    pub fn is_valid(&self) -> bool {
        match self {
            IndicatorKind::Sma(n)
            | IndicatorKind::Ema(n)
            | IndicatorKind::Rsi(n)
            | IndicatorKind::VolumeRatio(n)
            | IndicatorKind::RelativeStrength(n)
            | IndicatorKind::RsRank(n) => *n > 0,
            _ => true,
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorKind::Close => write!(f, "CLOSE"),
            IndicatorKind::Volume => write!(f, "VOLUME"),
            IndicatorKind::Sma(n) => write!(f, "SMA({})", n),
            IndicatorKind::Ema(n) => write!(f, "EMA({})", n),
            IndicatorKind::Rsi(n) => write!(f, "RSI({})", n),
            IndicatorKind::MacdLine => write!(f, "MACD"),
            IndicatorKind::MacdSignal => write!(f, "MACD_SIGNAL"),
            IndicatorKind::MacdHistogram => write!(f, "MACD_HIST"),
            IndicatorKind::RelativeStrength(h) => write!(f, "RS({})", h),
            IndicatorKind::RsRank(h) => write!(f, "RS_RANK({})", h),
            IndicatorKind::VolumeRatio(n) => write!(f, "VOLUME_RATIO({})", n),
            IndicatorKind::PriceChange => write!(f, "PRICE_CHANGE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub kind: IndicatorKind,
    pub values: Vec<Option<f64>>,
}

impl IndicatorSeries {
    pub fn empty(kind: IndicatorKind, len: usize) -> Self {
        IndicatorSeries {
            kind,
            values: vec![None; len],
        }
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }
}

/// Compute the per-bar series for one single-instrument indicator.
///
/// MACD kinds go through [`calculate_macd`] with the default parameters.
/// Cross-sectional kinds come back empty; they are filled by [`rank`].
pub fn compute_series(bars: &[PriceBar], kind: IndicatorKind) -> IndicatorSeries {
    match kind {
        IndicatorKind::Close => IndicatorSeries {
            kind,
            values: bars.iter().map(|b| Some(b.close)).collect(),
        },
        IndicatorKind::Volume => IndicatorSeries {
            kind,
            values: bars.iter().map(|b| Some(b.volume as f64)).collect(),
        },
        IndicatorKind::Sma(n) => calculate_sma(bars, n),
        IndicatorKind::Ema(n) => calculate_ema(bars, n),
        IndicatorKind::Rsi(n) => calculate_rsi(bars, n),
        IndicatorKind::MacdLine | IndicatorKind::MacdSignal | IndicatorKind::MacdHistogram => {
            calculate_macd(bars).series(kind)
        }
        IndicatorKind::RelativeStrength(h) => calculate_relative_strength(bars, h),
        IndicatorKind::VolumeRatio(n) => calculate_volume_ratio(bars, n),
        IndicatorKind::PriceChange => calculate_price_change(bars),
        IndicatorKind::RsRank(_) => IndicatorSeries::empty(kind, bars.len()),
    }
}
