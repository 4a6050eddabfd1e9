#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use signalbot::domain::condition::{Comparand, Condition, Operator};
use signalbot::domain::error::SignalbotError;
use signalbot::domain::indicator::IndicatorKind;
use signalbot::domain::live::LiveTrade;
pub use signalbot::domain::ohlcv::PriceBar;
use signalbot::domain::rule::{ConditionGroup, Rule, SignalType, StrategyFamily};
use signalbot::ports::price_history_port::PriceHistoryPort;
use signalbot::ports::trade_sink_port::TradeSinkPort;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

pub struct MockPriceHistory {
    pub data: BTreeMap<String, Vec<PriceBar>>,
    pub errors: HashMap<String, String>,
}

impl MockPriceHistory {
    pub fn new() -> Self {
        Self {
            data: BTreeMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl PriceHistoryPort for MockPriceHistory {
    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>, SignalbotError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(SignalbotError::DataSource {
                reason: reason.clone(),
            });
        }
        Ok(self
            .data
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date >= start && b.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_symbols(&self) -> Result<Vec<String>, SignalbotError> {
        Ok(self.data.keys().cloned().collect())
    }

    fn get_data_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, SignalbotError> {
        Ok(self.data.get(symbol).and_then(|bars| {
            let first = bars.first()?.date;
            let last = bars.last()?.date;
            Some((first, last, bars.len()))
        }))
    }
}

#[derive(Default)]
pub struct MemoryTradeSink {
    pub trades: Mutex<Vec<LiveTrade>>,
}

impl MemoryTradeSink {
    pub fn count(&self) -> usize {
        self.trades.lock().unwrap().len()
    }
}

impl TradeSinkPort for MemoryTradeSink {
    fn record(&self, trade: &LiveTrade) -> Result<(), SignalbotError> {
        self.trades.lock().unwrap().push(trade.clone());
        Ok(())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// One bar per calendar day from `start`.
pub fn make_bars(symbol: &str, start: NaiveDate, closes: &[f64]) -> Vec<PriceBar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| PriceBar {
            symbol: symbol.to_string(),
            date: start + Duration::days(i as i64),
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 100_000,
        })
        .collect()
}

/// 60 bars: down 20, up 20, down 20.
pub fn rise_then_fall_60() -> Vec<f64> {
    let mut closes: Vec<f64> = (0..20).map(|i| 200.0 - i as f64).collect();
    closes.extend((1..=20).map(|i| 181.0 + 3.0 * i as f64));
    closes.extend((1..=20).map(|i| 241.0 - 4.0 * i as f64));
    closes
}

/// SMA(fast) crossing SMA(slow), with levels far enough out that no
/// stop-loss or target triggers.
pub fn sma_cross_rule(fast: usize, slow: usize) -> Rule {
    let cross = |op| {
        vec![Condition::new(
            IndicatorKind::Sma(fast),
            op,
            Comparand::Indicator(IndicatorKind::Sma(slow)),
        )]
    };
    let mut rule = Rule::new(
        "sma_cross",
        StrategyFamily::TrendFollowing,
        vec![
            ConditionGroup::new("golden", SignalType::Buy, cross(Operator::CrossAbove)),
            ConditionGroup::new("death", SignalType::Sell, cross(Operator::CrossBelow)),
        ],
    );
    rule.target_pct = 500.0;
    rule.stop_loss_pct = 90.0;
    rule
}

pub const RULES_INI: &str = r#"
[rule.sma_cross]
name = SMA 5/20 cross
family = trend_following
target_pct = 500
stop_loss_pct = 90

[group.sma_cross.golden]
signal_type = BUY
condition.1 = SMA(5) CROSS_ABOVE SMA(20)

[group.sma_cross.death]
signal_type = SELL
condition.1 = SMA(5) CROSS_BELOW SMA(20)
"#;
