//! Simple Moving Average.
//!
//! SMA[i] = mean(C[i-n+1..=i]). Warmup: first (n-1) bars are absent.

use crate::domain::indicator::{IndicatorKind, IndicatorSeries};
use crate::domain::ohlcv::PriceBar;

pub fn calculate_sma(bars: &[PriceBar], period: usize) -> IndicatorSeries {
    let kind = IndicatorKind::Sma(period);
    if period == 0 {
        return IndicatorSeries::empty(kind, bars.len());
    }

    let values = (0..bars.len())
        .map(|i| {
            if i + 1 < period {
                None
            } else {
                let window = &bars[i + 1 - period..=i];
                Some(window.iter().map(|b| b.close).sum::<f64>() / period as f64)
            }
        })
        .collect();

    IndicatorSeries { kind, values }
}
