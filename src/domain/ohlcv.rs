//! Price bar representation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::error::SignalbotError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl PriceBar {
    /// Percent change of this close against `prev_close`. `None` when the
    /// previous close is not positive.
    pub fn change_pct(&self, prev_close: f64) -> Option<f64> {
        if prev_close > 0.0 {
            Some((self.close - prev_close) / prev_close * 100.0)
        } else {
            None
        }
    }

    /// close * volume
    pub fn traded_value(&self) -> f64 {
        self.close * self.volume as f64
    }
}

/// Check that a series is strictly increasing by date.
///
/// Out-of-order or duplicate dates make indicator recurrences and cross-over
/// detection meaningless, so they are reported as a simulation failure.
pub fn validate_series(symbol: &str, bars: &[PriceBar]) -> Result<(), SignalbotError> {
    for pair in bars.windows(2) {
        if pair[1].date <= pair[0].date {
            return Err(SignalbotError::SimulationFailure {
                reason: format!(
                    "{}: non-monotonic dates ({} followed by {})",
                    symbol, pair[0].date, pair[1].date
                ),
            });
        }
    }
    Ok(())
}

/// Bars dated on or before `as_of`, assuming `bars` is sorted.
pub fn history_until(bars: &[PriceBar], as_of: NaiveDate) -> &[PriceBar] {
    let end = bars.partition_point(|b| b.date <= as_of);
    &bars[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(day: u32, close: f64) -> PriceBar {
        PriceBar {
            symbol: "005930".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 2_000,
        }
    }

    #[test]
    fn change_pct_up_and_down() {
        let b = bar(2, 110.0);
        assert!((b.change_pct(100.0).unwrap() - 10.0).abs() < 1e-12);
        let b = bar(2, 90.0);
        assert!((b.change_pct(100.0).unwrap() + 10.0).abs() < 1e-12);
    }

    #[test]
    fn change_pct_zero_previous() {
        assert_eq!(bar(2, 50.0).change_pct(0.0), None);
    }

    #[test]
    fn traded_value() {
        assert!((bar(1, 10.0).traded_value() - 20_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn validate_series_accepts_increasing() {
        let bars = vec![bar(1, 1.0), bar(2, 1.0), bar(5, 1.0)];
        assert!(validate_series("X", &bars).is_ok());
    }

    #[test]
    fn validate_series_rejects_duplicate_date() {
        let bars = vec![bar(1, 1.0), bar(2, 1.0), bar(2, 1.0)];
        let err = validate_series("X", &bars).unwrap_err();
        assert!(matches!(err, SignalbotError::SimulationFailure { .. }));
    }

    #[test]
    fn validate_series_rejects_out_of_order() {
        let bars = vec![bar(3, 1.0), bar(2, 1.0)];
        assert!(validate_series("X", &bars).is_err());
    }

    #[test]
    fn history_until_truncates_inclusive() {
        let bars = vec![bar(1, 1.0), bar(2, 2.0), bar(3, 3.0)];
        let cut = history_until(&bars, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(cut.len(), 2);
        assert_eq!(cut.last().unwrap().close, 2.0);
    }
}
