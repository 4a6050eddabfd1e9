//! Append-only CSV log of live trades.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::domain::error::SignalbotError;
use crate::domain::execution::TradeSide;
use crate::domain::live::{LiveTrade, TradeOrigin};
use crate::ports::trade_sink_port::TradeSinkPort;

#[derive(Debug, Serialize)]
struct TradeRecord<'a> {
    executed_at: DateTime<Utc>,
    origin: TradeOrigin,
    source: String,
    symbol: &'a str,
    side: TradeSide,
    date: NaiveDate,
    quantity: i64,
    price: f64,
    commission: f64,
    realized_pnl: f64,
    confidence: Option<f64>,
    reason: &'a str,
}

impl<'a> From<&'a LiveTrade> for TradeRecord<'a> {
    fn from(live: &'a LiveTrade) -> Self {
        TradeRecord {
            executed_at: live.executed_at,
            origin: live.origin,
            source: live.source.as_ref().map(|s| s.to_string()).unwrap_or_default(),
            symbol: &live.trade.symbol,
            side: live.trade.side,
            date: live.trade.date,
            quantity: live.trade.quantity,
            price: live.trade.price,
            commission: live.trade.commission,
            realized_pnl: live.trade.realized_pnl,
            confidence: live.confidence,
            reason: &live.trade.reason,
        }
    }
}

pub struct CsvTradeSink {
    path: PathBuf,
    writer: Mutex<csv::Writer<std::fs::File>>,
}

impl CsvTradeSink {
    /// Open `path` for appending. The header is written only to a new or
    /// empty file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SignalbotError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let fresh = file.metadata()?.len() == 0;
        let writer = csv::WriterBuilder::new().has_headers(fresh).from_writer(file);
        Ok(CsvTradeSink {
            path,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TradeSinkPort for CsvTradeSink {
    fn record(&self, trade: &LiveTrade) -> Result<(), SignalbotError> {
        let mut writer = self.writer.lock().map_err(|_| SignalbotError::Portfolio {
            reason: format!("trade log {} lock poisoned", self.path.display()),
        })?;
        writer.serialize(TradeRecord::from(trade))?;
        writer.flush()?;
        Ok(())
    }
}
