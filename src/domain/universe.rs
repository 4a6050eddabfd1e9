//! Instrument universe: parsing symbol lists and loading their history.
//!
//! Symbols that cannot be fetched or have no bars in the window are skipped
//! with a warning. A series with out-of-order dates aborts the load.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

use crate::domain::error::SignalbotError;
use crate::domain::ohlcv::{validate_series, PriceBar};
use crate::ports::price_history_port::PriceHistoryPort;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in symbol list")]
    EmptyToken,

    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),
}

impl From<UniverseError> for SignalbotError {
    fn from(err: UniverseError) -> Self {
        SignalbotError::invalid("backtest", "symbols", err.to_string())
    }
}

/// Split a comma-separated list, trimming and uppercasing each symbol.
pub fn parse_symbols(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut symbols = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let symbol = trimmed.to_uppercase();
        if !seen.insert(symbol.clone()) {
            return Err(UniverseError::DuplicateSymbol(symbol));
        }
        symbols.push(symbol);
    }

    Ok(symbols)
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    FetchFailed(String),
    NoData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSymbol {
    pub symbol: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedUniverse {
    pub histories: BTreeMap<String, Vec<PriceBar>>,
    pub skipped: Vec<SkippedSymbol>,
}

impl LoadedUniverse {
    pub fn symbols(&self) -> impl Iterator<Item = &String> {
        self.histories.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}

/// Fetch `[start, end]` for every symbol.
///
/// Fails with `NoData` when no symbol has any bars, and with
/// `SimulationFailure` when a fetched series is not strictly ascending.
pub fn load_universe(
    provider: &dyn PriceHistoryPort,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<LoadedUniverse, SignalbotError> {
    let mut loaded = LoadedUniverse::default();

    for symbol in symbols {
        let bars = match provider.fetch_bars(symbol, start, end) {
            Ok(bars) => bars,
            Err(e) => {
                warn!(%symbol, error = %e, "skipping symbol, fetch failed");
                loaded.skipped.push(SkippedSymbol {
                    symbol: symbol.clone(),
                    reason: SkipReason::FetchFailed(e.to_string()),
                });
                continue;
            }
        };

        if bars.is_empty() {
            warn!(%symbol, %start, %end, "skipping symbol, no bars in window");
            loaded.skipped.push(SkippedSymbol {
                symbol: symbol.clone(),
                reason: SkipReason::NoData,
            });
            continue;
        }

        validate_series(symbol, &bars)?;
        debug!(%symbol, bars = bars.len(), "loaded history");
        loaded.histories.insert(symbol.clone(), bars);
    }

    if loaded.is_empty() {
        return Err(SignalbotError::NoData {
            symbol: symbols.join(","),
        });
    }

    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubProvider {
        bars: BTreeMap<String, Vec<PriceBar>>,
        calls: Mutex<Vec<String>>,
    }

    impl PriceHistoryPort for StubProvider {
        fn fetch_bars(
            &self,
            symbol: &str,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<PriceBar>, SignalbotError> {
            self.calls.lock().unwrap().push(symbol.to_string());
            match self.bars.get(symbol) {
                Some(bars) => Ok(bars
                    .iter()
                    .filter(|b| b.date >= start && b.date <= end)
                    .cloned()
                    .collect()),
                None => Err(SignalbotError::DataSource {
                    reason: format!("unknown symbol {symbol}"),
                }),
            }
        }

        fn list_symbols(&self) -> Result<Vec<String>, SignalbotError> {
            Ok(self.bars.keys().cloned().collect())
        }

        fn get_data_range(
            &self,
            _symbol: &str,
        ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, SignalbotError> {
            Ok(None)
        }
    }

    fn bar(symbol: &str, day: u32) -> PriceBar {
        PriceBar {
            symbol: symbol.into(),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.0,
            volume: 1000,
        }
    }

    fn provider(entries: Vec<(&str, Vec<PriceBar>)>) -> StubProvider {
        StubProvider {
            bars: entries.into_iter().map(|(s, b)| (s.to_string(), b)).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn parse_symbols_trims_and_uppercases() {
        let result = parse_symbols("  005930 , aapl ,MSFT").unwrap();
        assert_eq!(result, vec!["005930", "AAPL", "MSFT"]);
    }

    #[test]
    fn parse_symbols_single() {
        assert_eq!(parse_symbols("000660").unwrap(), vec!["000660"]);
    }

    #[test]
    fn parse_symbols_empty_token() {
        assert_eq!(parse_symbols("A,,B"), Err(UniverseError::EmptyToken));
        assert_eq!(parse_symbols(""), Err(UniverseError::EmptyToken));
    }

    #[test]
    fn parse_symbols_duplicate_is_case_insensitive() {
        assert_eq!(
            parse_symbols("aapl,MSFT,AAPL"),
            Err(UniverseError::DuplicateSymbol("AAPL".into()))
        );
    }

    #[test]
    fn universe_error_maps_to_config_invalid() {
        let err: SignalbotError = UniverseError::EmptyToken.into();
        assert!(matches!(err, SignalbotError::ConfigInvalid { ref key, .. } if key == "symbols"));
    }

    #[test]
    fn load_skips_failed_and_empty_symbols() {
        let p = provider(vec![
            ("A", vec![bar("A", 2), bar("A", 3)]),
            ("B", vec![bar("B", 20)]),
        ]);
        let symbols: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let loaded = load_universe(&p, &symbols, d(1), d(10)).unwrap();

        assert_eq!(loaded.symbols().collect::<Vec<_>>(), vec!["A"]);
        assert_eq!(loaded.histories["A"].len(), 2);
        assert_eq!(loaded.skipped.len(), 2);
        assert_eq!(loaded.skipped[0].reason, SkipReason::NoData);
        assert!(matches!(loaded.skipped[1].reason, SkipReason::FetchFailed(_)));
        assert_eq!(p.calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn load_fails_when_nothing_loads() {
        let p = provider(vec![]);
        let err = load_universe(&p, &["X".to_string()], d(1), d(10)).unwrap_err();
        assert!(matches!(err, SignalbotError::NoData { .. }));
    }

    #[test]
    fn load_rejects_unsorted_series() {
        let p = provider(vec![("A", vec![bar("A", 3), bar("A", 2)])]);
        let err = load_universe(&p, &["A".to_string()], d(1), d(10)).unwrap_err();
        assert!(matches!(err, SignalbotError::SimulationFailure { .. }));
    }
}
