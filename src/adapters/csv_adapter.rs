//! CSV price history adapter.
//!
//! One file per symbol, `<SYMBOL>.csv`, with a
//! `date,open,high,low,close,volume` header. Rows are returned in file
//! order; ordering is checked by the domain, not repaired here.

use chrono::NaiveDate;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::domain::error::SignalbotError;
use crate::domain::ohlcv::PriceBar;
use crate::ports::price_history_port::PriceHistoryPort;

#[derive(Debug, Deserialize)]
struct CsvRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: i64,
}

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", symbol))
    }

    fn read_all(&self, symbol: &str) -> Result<Vec<PriceBar>, SignalbotError> {
        let path = self.csv_path(symbol);
        let mut rdr = csv::Reader::from_path(&path).map_err(|e| SignalbotError::DataSource {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut bars = Vec::new();
        for (line, row) in rdr.deserialize::<CsvRow>().enumerate() {
            let row = row.map_err(|e| SignalbotError::DataSource {
                reason: format!("{} row {}: {}", path.display(), line + 1, e),
            })?;
            bars.push(PriceBar {
                symbol: symbol.to_string(),
                date: row.date,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }
        Ok(bars)
    }
}

impl PriceHistoryPort for CsvAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, SignalbotError> {
        let mut bars = self.read_all(symbol)?;
        bars.retain(|b| b.date >= start && b.date <= end);
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, SignalbotError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| SignalbotError::DataSource {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(symbol) = name.to_string_lossy().strip_suffix(".csv") {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }

    fn get_data_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, SignalbotError> {
        if !self.csv_path(symbol).exists() {
            return Ok(None);
        }
        let bars = self.read_all(symbol)?;
        let first = bars.iter().map(|b| b.date).min();
        let last = bars.iter().map(|b| b.date).max();
        Ok(first.zip(last).map(|(f, l)| (f, l, bars.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        let csv_content = "date,open,high,low,close,volume\n\
            2024-01-15,100.0,110.0,90.0,105.0,50000\n\
            2024-01-16,105.0,115.0,100.0,110.0,60000\n\
            2024-01-17,110.0,120.0,105.0,115.0,55000\n";

        fs::write(path.join("005930.csv"), csv_content).unwrap();
        fs::write(path.join("000660.csv"), "date,open,high,low,close,volume\n").unwrap();
        fs::write(path.join("notes.txt"), "ignored").unwrap();

        (dir, path)
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn fetch_bars_returns_correct_data() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let bars = adapter.fetch_bars("005930", d(15), d(17)).unwrap();

        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].symbol, "005930");
        assert_eq!(bars[0].date, d(15));
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].high, 110.0);
        assert_eq!(bars[0].low, 90.0);
        assert_eq!(bars[0].close, 105.0);
        assert_eq!(bars[0].volume, 50000);
    }

    #[test]
    fn fetch_bars_filters_by_date() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let bars = adapter.fetch_bars("005930", d(16), d(16)).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].date, d(16));
    }

    #[test]
    fn fetch_bars_errors_for_missing_file() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let result = adapter.fetch_bars("XYZ", d(1), d(31));
        assert!(matches!(result, Err(SignalbotError::DataSource { .. })));
    }

    #[test]
    fn fetch_bars_reports_bad_rows() {
        let (_dir, path) = setup_test_data();
        fs::write(
            path.join("BAD.csv"),
            "date,open,high,low,close,volume\n2024-01-15,abc,1,1,1,1\n",
        )
        .unwrap();
        let adapter = CsvAdapter::new(path);
        let err = adapter.fetch_bars("BAD", d(1), d(31)).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn fetch_bars_keeps_file_order() {
        let (_dir, path) = setup_test_data();
        fs::write(
            path.join("REV.csv"),
            "date,open,high,low,close,volume\n\
             2024-01-16,1,1,1,1,1\n\
             2024-01-15,1,1,1,1,1\n",
        )
        .unwrap();
        let adapter = CsvAdapter::new(path);
        let bars = adapter.fetch_bars("REV", d(1), d(31)).unwrap();
        assert_eq!(bars[0].date, d(16));
    }

    #[test]
    fn list_symbols_returns_csv_stems() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        assert_eq!(adapter.list_symbols().unwrap(), vec!["000660", "005930"]);
    }

    #[test]
    fn data_range() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        assert_eq!(
            adapter.get_data_range("005930").unwrap(),
            Some((d(15), d(17), 3))
        );
        assert_eq!(adapter.get_data_range("000660").unwrap(), None);
        assert_eq!(adapter.get_data_range("XYZ").unwrap(), None);
    }
}
