//! Momentum indicators: one-bar price change and horizon return.
//!
//! PRICE_CHANGE[i] = (C[i] - C[i-1]) / C[i-1] * 100
//! RS(h)[i]        = (C[i] - C[i-h]) / C[i-h] * 100

use crate::domain::indicator::{IndicatorKind, IndicatorSeries};
use crate::domain::ohlcv::PriceBar;

pub fn calculate_price_change(bars: &[PriceBar]) -> IndicatorSeries {
    let mut series = calculate_return(bars, 1);
    series.kind = IndicatorKind::PriceChange;
    series
}

pub fn calculate_relative_strength(bars: &[PriceBar], horizon: usize) -> IndicatorSeries {
    calculate_return(bars, horizon)
}

fn calculate_return(bars: &[PriceBar], horizon: usize) -> IndicatorSeries {
    let kind = IndicatorKind::RelativeStrength(horizon);
    if horizon == 0 {
        return IndicatorSeries::empty(kind, bars.len());
    }

    let values = (0..bars.len())
        .map(|i| {
            if i < horizon {
                None
            } else {
                bars[i].change_pct(bars[i - horizon].close)
            }
        })
        .collect();

    IndicatorSeries { kind, values }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;

    #[test]
    fn price_change_first_bar_absent() {
        let series = calculate_price_change(&make_bars(&[100.0, 105.0]));
        assert_eq!(series.kind, IndicatorKind::PriceChange);
        assert_eq!(series.values[0], None);
        assert!((series.get(1).unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn relative_strength_over_horizon() {
        let series = calculate_relative_strength(&make_bars(&[50.0, 60.0, 40.0, 75.0]), 3);
        assert_eq!(series.values[2], None);
        assert!((series.get(3).unwrap() - 50.0).abs() < 1e-12);
    }

    #[test]
    fn relative_strength_zero_base_is_absent() {
        let series = calculate_relative_strength(&make_bars(&[0.0, 10.0]), 1);
        assert_eq!(series.values[1], None);
    }
}
