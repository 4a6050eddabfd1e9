//! Volume ratio: current volume over the mean of the previous `n` volumes.
//!
//! Absent during warmup (first n bars) and whenever the trailing mean is zero.

use crate::domain::indicator::{IndicatorKind, IndicatorSeries};
use crate::domain::ohlcv::PriceBar;

pub fn calculate_volume_ratio(bars: &[PriceBar], period: usize) -> IndicatorSeries {
    let kind = IndicatorKind::VolumeRatio(period);
    if period == 0 {
        return IndicatorSeries::empty(kind, bars.len());
    }

    let values = (0..bars.len())
        .map(|i| {
            if i < period {
                return None;
            }
            let trailing = &bars[i - period..i];
            let mean = trailing.iter().map(|b| b.volume as f64).sum::<f64>() / period as f64;
            if mean > 0.0 {
                Some(bars[i].volume as f64 / mean)
            } else {
                None
            }
        })
        .collect();

    IndicatorSeries { kind, values }
}
