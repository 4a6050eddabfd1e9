//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line, seeded by the SMA of its first values
//! Histogram = MACD Line - Signal Line
//!
//! Parameters: fast=12, slow=26, signal=9
//! Warmup: line valid from bar slow-1, signal/histogram from slow-1 + signal-1.

use crate::domain::indicator::ema::ema_of;
use crate::domain::indicator::{IndicatorKind, IndicatorSeries};
use crate::domain::ohlcv::PriceBar;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub struct MacdSeries {
    pub line: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

impl MacdSeries {
    /// Extract the component matching a MACD kind.
    pub fn series(self, kind: IndicatorKind) -> IndicatorSeries {
        let values = match kind {
            IndicatorKind::MacdSignal => self.signal,
            IndicatorKind::MacdHistogram => self.histogram,
            _ => self.line,
        };
        IndicatorSeries { kind, values }
    }
}

pub fn calculate_macd(bars: &[PriceBar]) -> MacdSeries {
    calculate_macd_with(bars, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
}

pub fn calculate_macd_with(
    bars: &[PriceBar],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> MacdSeries {
    let n = bars.len();
    if fast == 0 || slow == 0 || signal_period == 0 {
        return MacdSeries {
            line: vec![None; n],
            signal: vec![None; n],
            histogram: vec![None; n],
        };
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let ema_fast = ema_of(&closes, fast);
    let ema_slow = ema_of(&closes, slow);

    let line: Vec<Option<f64>> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    // Signal EMA runs over the defined part of the line only.
    let start = line.iter().position(|v| v.is_some()).unwrap_or(n);
    let defined: Vec<f64> = line[start..].iter().flatten().copied().collect();
    let mut signal = vec![None; start];
    signal.extend(ema_of(&defined, signal_period));

    let histogram = line
        .iter()
        .zip(&signal)
        .map(|(l, s)| match (l, s) {
            (Some(l), Some(s)) => Some(l - s),
            _ => None,
        })
        .collect();

    MacdSeries {
        line,
        signal,
        histogram,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::calculate_ema;
    use crate::domain::indicator::test_support::make_bars;

    fn trending(n: usize) -> Vec<PriceBar> {
        let prices: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
        make_bars(&prices)
    }

    #[test]
    fn macd_warmup_default() {
        let macd = calculate_macd(&trending(40));
        let warmup = DEFAULT_SLOW - 1 + DEFAULT_SIGNAL - 1;
        assert!(macd.line[DEFAULT_SLOW - 2].is_none());
        assert!(macd.line[DEFAULT_SLOW - 1].is_some());
        assert!(macd.signal[warmup - 1].is_none());
        assert!(macd.signal[warmup].is_some());
        assert!(macd.histogram[warmup].is_some());
    }

    #[test]
    fn macd_histogram_equals_line_minus_signal() {
        let macd = calculate_macd(&trending(50));
        for i in 0..50 {
            if let (Some(l), Some(s), Some(h)) = (macd.line[i], macd.signal[i], macd.histogram[i]) {
                assert!((h - (l - s)).abs() < f64::EPSILON);
            }
        }
    }

    #[test]
    fn macd_line_is_ema_fast_minus_ema_slow() {
        let bars = make_bars(&[10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0]);
        let macd = calculate_macd_with(&bars, 3, 5, 2);
        let fast = calculate_ema(&bars, 3);
        let slow = calculate_ema(&bars, 5);

        for i in 4..bars.len() {
            let expected = fast.get(i).unwrap() - slow.get(i).unwrap();
            assert!((macd.line[i].unwrap() - expected).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn macd_signal_seed_is_mean_of_first_line_values() {
        let bars = make_bars(&[10.0, 12.0, 11.0, 15.0, 14.0, 18.0, 17.0, 21.0]);
        let macd = calculate_macd_with(&bars, 2, 3, 3);
        let seed = (macd.line[2].unwrap() + macd.line[3].unwrap() + macd.line[4].unwrap()) / 3.0;
        assert!(macd.signal[3].is_none());
        assert!((macd.signal[4].unwrap() - seed).abs() < 1e-12);
    }

    #[test]
    fn macd_empty_bars() {
        let macd = calculate_macd(&[]);
        assert!(macd.line.is_empty());
        assert!(macd.signal.is_empty());
    }

    #[test]
    fn macd_zero_period() {
        let bars = make_bars(&[100.0, 101.0, 102.0]);
        let macd = calculate_macd_with(&bars, 0, 26, 9);
        assert!(macd.line.iter().all(|v| v.is_none()));
    }

    #[test]
    fn macd_series_selects_component() {
        let macd = calculate_macd(&trending(40));
        let hist = macd.clone().series(IndicatorKind::MacdHistogram);
        assert_eq!(hist.kind, IndicatorKind::MacdHistogram);
        assert_eq!(hist.values, macd.histogram);
    }
}
