//! Price history access port trait.

use chrono::NaiveDate;

use crate::domain::error::SignalbotError;
use crate::domain::ohlcv::PriceBar;

/// Read-only source of daily bars. Shared across backtest runs and the
/// scanner task, so implementations must be thread-safe.
pub trait PriceHistoryPort: Send + Sync {
    /// Bars for `symbol` dated within `[start, end]`, oldest first.
    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, SignalbotError>;

    fn list_symbols(&self) -> Result<Vec<String>, SignalbotError>;

    /// First date, last date and bar count, or `None` when nothing is stored.
    fn get_data_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, SignalbotError>;
}
