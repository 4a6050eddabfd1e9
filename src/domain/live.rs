//! Live portfolio execution.
//!
//! [`LiveExecutor`] owns the live portfolio behind a mutex. Every mutation,
//! bot-triggered or manual, runs under the lock, and the trade is recorded in
//! the sink before the lock is released so the trade log follows execution
//! order. A trade the sink refuses is rolled back, so the portfolio only ever
//! reflects logged trades.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::domain::error::SignalbotError;
use crate::domain::execution::{
    check_triggers, enter_long, reduce_position, size_position, ExecutionConfig, SimulatedTrade,
};
use crate::domain::portfolio::Portfolio;
use crate::domain::signal::{Direction, Signal, SignalSource};
use crate::ports::trade_sink_port::TradeSinkPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOrigin {
    Bot,
    Manual,
    /// Stop-loss or target exit.
    Trigger,
}

impl fmt::Display for TradeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TradeOrigin::Bot => "bot",
            TradeOrigin::Manual => "manual",
            TradeOrigin::Trigger => "trigger",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveTrade {
    pub executed_at: DateTime<Utc>,
    pub origin: TradeOrigin,
    pub source: Option<SignalSource>,
    pub confidence: Option<f64>,
    pub trade: SimulatedTrade,
}

pub struct LiveExecutor {
    portfolio: Mutex<Portfolio>,
    config: ExecutionConfig,
    sink: Option<Arc<dyn TradeSinkPort>>,
}

impl LiveExecutor {
    pub fn new(initial_capital: f64, config: ExecutionConfig) -> Self {
        LiveExecutor {
            portfolio: Mutex::new(Portfolio::new(initial_capital)),
            config,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn TradeSinkPort>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, Portfolio>, SignalbotError> {
        self.portfolio.lock().map_err(|_| SignalbotError::Portfolio {
            reason: "live portfolio lock poisoned".to_string(),
        })
    }

    /// Record `trade`, restoring `before` if the sink refuses it.
    fn commit(
        &self,
        portfolio: &mut Portfolio,
        before: Portfolio,
        trade: &LiveTrade,
    ) -> Result<(), SignalbotError> {
        if let Err(e) = self.record(trade) {
            warn!(symbol = %trade.trade.symbol, error = %e, "trade log failed, trade rolled back");
            *portfolio = before;
            return Err(e);
        }
        Ok(())
    }

    fn record(&self, trade: &LiveTrade) -> Result<(), SignalbotError> {
        info!(
            origin = %trade.origin,
            symbol = %trade.trade.symbol,
            side = %trade.trade.side,
            quantity = trade.trade.quantity,
            price = trade.trade.price,
            "live trade"
        );
        match &self.sink {
            Some(sink) => sink.record(trade),
            None => Ok(()),
        }
    }

    /// Act on a fired signal: buy when flat, sell out when holding.
    ///
    /// Returns `None` when the signal needs no action or sizing rejects it.
    pub fn execute_signal(
        &self,
        signal: &Signal,
        now: DateTime<Utc>,
    ) -> Result<Option<LiveTrade>, SignalbotError> {
        let Some(direction) = signal.fired else {
            return Ok(None);
        };
        let reason = format!("{} {}", signal.source, signal.classification);

        let mut portfolio = self.lock()?;
        let before = portfolio.clone();
        let held = portfolio.has_position(&signal.symbol);
        let trade = match direction {
            Direction::Buy if !held => {
                let quantity = size_position(
                    portfolio.total_equity(),
                    self.config.risk_per_trade,
                    signal.close,
                    signal.stop_loss_price,
                );
                match enter_long(
                    &mut portfolio,
                    &signal.symbol,
                    quantity,
                    signal.close,
                    signal.as_of,
                    signal.stop_loss_price,
                    signal.target_price,
                    &self.config,
                    &reason,
                ) {
                    Ok(trade) => trade,
                    Err(rejection) => {
                        info!(symbol = %signal.symbol, %rejection, "live signal skipped");
                        return Ok(None);
                    }
                }
            }
            Direction::Sell if held => {
                let quantity = portfolio
                    .get_position(&signal.symbol)
                    .map(|p| p.quantity)
                    .unwrap_or(0);
                match reduce_position(
                    &mut portfolio,
                    &signal.symbol,
                    quantity,
                    signal.close,
                    signal.as_of,
                    &self.config,
                    &reason,
                ) {
                    Some(trade) => trade,
                    None => return Ok(None),
                }
            }
            _ => {
                debug!(symbol = %signal.symbol, %direction, held, "no action for signal");
                return Ok(None);
            }
        };

        let live = LiveTrade {
            executed_at: now,
            origin: TradeOrigin::Bot,
            source: Some(signal.source.clone()),
            confidence: Some(signal.confidence),
            trade,
        };
        self.commit(&mut portfolio, before, &live)?;
        drop(portfolio);
        Ok(Some(live))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn manual_buy(
        &self,
        symbol: &str,
        quantity: i64,
        price: f64,
        date: NaiveDate,
        stop_loss: f64,
        target: f64,
        now: DateTime<Utc>,
    ) -> Result<LiveTrade, SignalbotError> {
        let mut portfolio = self.lock()?;
        let before = portfolio.clone();
        let trade = enter_long(
            &mut portfolio,
            symbol,
            quantity,
            price,
            date,
            stop_loss,
            target,
            &self.config,
            "manual buy",
        )
        .map_err(|rejection| SignalbotError::Portfolio {
            reason: format!("buy {} {}: {}", quantity, symbol, rejection),
        })?;

        let live = LiveTrade {
            executed_at: now,
            origin: TradeOrigin::Manual,
            source: None,
            confidence: None,
            trade,
        };
        self.commit(&mut portfolio, before, &live)?;
        Ok(live)
    }

    pub fn manual_sell(
        &self,
        symbol: &str,
        quantity: i64,
        price: f64,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<LiveTrade, SignalbotError> {
        let mut portfolio = self.lock()?;
        let before = portfolio.clone();
        let trade = reduce_position(
            &mut portfolio,
            symbol,
            quantity,
            price,
            date,
            &self.config,
            "manual sell",
        )
        .ok_or_else(|| SignalbotError::Portfolio {
            reason: format!("no open position in {}", symbol),
        })?;

        let live = LiveTrade {
            executed_at: now,
            origin: TradeOrigin::Manual,
            source: None,
            confidence: None,
            trade,
        };
        self.commit(&mut portfolio, before, &live)?;
        Ok(live)
    }

    /// Mark positions and exit any whose stop-loss or target is hit.
    ///
    /// If the sink refuses an exit, only the exits already logged stay
    /// applied and the error is returned.
    pub fn mark_and_trigger(
        &self,
        prices: &BTreeMap<String, f64>,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<LiveTrade>, SignalbotError> {
        let mut portfolio = self.lock()?;
        portfolio.mark(prices);
        let before = portfolio.clone();
        let exits = check_triggers(&mut portfolio, prices, date, &self.config);

        let mut recorded: Vec<LiveTrade> = Vec::with_capacity(exits.len());
        for trade in exits {
            let live = LiveTrade {
                executed_at: now,
                origin: TradeOrigin::Trigger,
                source: None,
                confidence: None,
                trade,
            };
            if let Err(e) = self.record(&live) {
                warn!(
                    symbol = %live.trade.symbol,
                    error = %e,
                    "trade log failed, exit rolled back"
                );
                *portfolio = before;
                let logged: BTreeMap<String, f64> = recorded
                    .iter()
                    .filter_map(|t| prices.get_key_value(&t.trade.symbol))
                    .map(|(s, p)| (s.clone(), *p))
                    .collect();
                check_triggers(&mut portfolio, &logged, date, &self.config);
                return Err(e);
            }
            recorded.push(live);
        }
        Ok(recorded)
    }

    /// A consistent copy of the portfolio.
    pub fn snapshot(&self) -> Result<Portfolio, SignalbotError> {
        Ok(self.lock()?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::test_support::signal;
    use chrono::TimeZone;

    #[derive(Default)]
    struct VecSink {
        trades: Mutex<Vec<LiveTrade>>,
    }

    impl TradeSinkPort for VecSink {
        fn record(&self, trade: &LiveTrade) -> Result<(), SignalbotError> {
            self.trades.lock().unwrap().push(trade.clone());
            Ok(())
        }
    }

    /// Accepts the first `accept` trades, then refuses every write.
    struct FailingSink {
        accept: usize,
        trades: Mutex<Vec<LiveTrade>>,
    }

    impl FailingSink {
        fn after(accept: usize) -> Arc<Self> {
            Arc::new(FailingSink {
                accept,
                trades: Mutex::new(Vec::new()),
            })
        }
    }

    impl TradeSinkPort for FailingSink {
        fn record(&self, trade: &LiveTrade) -> Result<(), SignalbotError> {
            let mut trades = self.trades.lock().unwrap();
            if trades.len() >= self.accept {
                return Err(SignalbotError::Io(std::io::Error::other("disk full")));
            }
            trades.push(trade.clone());
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 1, 0, 0).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn fired(symbol: &str, direction: Direction) -> Signal {
        let mut s = signal(symbol, 90.0, 0.9);
        s.fired = Some(direction);
        s.close = 100.0;
        s.stop_loss_price = 95.0;
        s.target_price = 110.0;
        s.as_of = date();
        s
    }

    fn executor(sink: &Arc<VecSink>) -> LiveExecutor {
        LiveExecutor::new(100_000.0, ExecutionConfig::default()).with_sink(sink.clone())
    }

    fn executor_with(sink: Arc<FailingSink>) -> LiveExecutor {
        LiveExecutor::new(100_000.0, ExecutionConfig::default()).with_sink(sink)
    }

    #[test]
    fn buy_then_sell_signal() {
        let sink = Arc::new(VecSink::default());
        let exec = executor(&sink);

        let buy = exec.execute_signal(&fired("A", Direction::Buy), now()).unwrap().unwrap();
        // 100_000 * 0.02 / 5 = 400 shares
        assert_eq!(buy.trade.quantity, 400);
        assert_eq!(buy.origin, TradeOrigin::Bot);

        // already holding: a second buy is a no-op
        assert!(exec.execute_signal(&fired("A", Direction::Buy), now()).unwrap().is_none());

        let sell = exec.execute_signal(&fired("A", Direction::Sell), now()).unwrap().unwrap();
        assert_eq!(sell.trade.quantity, 400);
        assert!(exec.snapshot().unwrap().positions.is_empty());
        assert_eq!(sink.trades.lock().unwrap().len(), 2);
    }

    #[test]
    fn sell_without_position_and_hold_do_nothing() {
        let sink = Arc::new(VecSink::default());
        let exec = executor(&sink);
        assert!(exec.execute_signal(&fired("A", Direction::Sell), now()).unwrap().is_none());
        assert!(exec.execute_signal(&signal("A", 50.0, 0.9), now()).unwrap().is_none());
        assert!(sink.trades.lock().unwrap().is_empty());
    }

    #[test]
    fn rejected_sizing_is_not_an_error() {
        let sink = Arc::new(VecSink::default());
        let exec = LiveExecutor::new(1_000.0, ExecutionConfig {
            commission_rate: 0.0,
            risk_per_trade: 1.0,
        })
        .with_sink(sink.clone());
        // 1000 / 5 = 200 shares at 100 needs 20_000
        assert!(exec.execute_signal(&fired("A", Direction::Buy), now()).unwrap().is_none());
        assert_eq!(exec.snapshot().unwrap().cash, 1_000.0);
    }

    #[test]
    fn manual_trades_share_the_portfolio() {
        let sink = Arc::new(VecSink::default());
        let exec = executor(&sink);
        exec.manual_buy("A", 10, 100.0, date(), 90.0, 120.0, now()).unwrap();
        let sold = exec.manual_sell("A", 4, 105.0, date(), now()).unwrap();
        assert_eq!(sold.origin, TradeOrigin::Manual);
        assert_eq!(exec.snapshot().unwrap().get_position("A").unwrap().quantity, 6);

        let err = exec.manual_sell("B", 1, 10.0, date(), now()).unwrap_err();
        assert!(matches!(err, SignalbotError::Portfolio { .. }));
        let err = exec.manual_buy("A", 10_000, 100.0, date(), 90.0, 120.0, now()).unwrap_err();
        assert!(matches!(err, SignalbotError::Portfolio { .. }));
    }

    #[test]
    fn triggers_are_recorded() {
        let sink = Arc::new(VecSink::default());
        let exec = executor(&sink);
        exec.manual_buy("A", 10, 100.0, date(), 90.0, 120.0, now()).unwrap();
        let prices: BTreeMap<String, f64> = [("A".to_string(), 89.0)].into_iter().collect();
        let exits = exec.mark_and_trigger(&prices, date(), now()).unwrap();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].origin, TradeOrigin::Trigger);
        assert_eq!(sink.trades.lock().unwrap().len(), 2);
    }

    #[test]
    fn refused_manual_trades_leave_the_portfolio_untouched() {
        let exec = LiveExecutor::new(1_000_000.0, ExecutionConfig::default())
            .with_sink(FailingSink::after(0));
        let err = exec.manual_buy("A", 10, 100.0, date(), 90.0, 120.0, now()).unwrap_err();
        assert!(matches!(err, SignalbotError::Io(_)));
        let snapshot = exec.snapshot().unwrap();
        assert_eq!(snapshot.cash, 1_000_000.0);
        assert!(!snapshot.has_position("A"));
    }

    #[test]
    fn refused_signal_and_sell_are_rolled_back() {
        let sink = FailingSink::after(1);
        let exec = executor_with(sink.clone());
        exec.execute_signal(&fired("A", Direction::Buy), now()).unwrap().unwrap();
        let held = exec.snapshot().unwrap();

        assert!(exec.execute_signal(&fired("A", Direction::Sell), now()).is_err());
        assert!(exec.manual_sell("A", 100, 105.0, date(), now()).is_err());
        let after = exec.snapshot().unwrap();
        assert_eq!(after.cash, held.cash);
        assert_eq!(after.get_position("A").unwrap().quantity, 400);
        assert_eq!(sink.trades.lock().unwrap().len(), 1);
    }

    #[test]
    fn refused_trigger_keeps_only_logged_exits() {
        let sink = FailingSink::after(3);
        let exec = executor_with(sink.clone());
        exec.manual_buy("A", 10, 100.0, date(), 90.0, 120.0, now()).unwrap();
        exec.manual_buy("B", 10, 100.0, date(), 90.0, 120.0, now()).unwrap();
        let cash_before = exec.snapshot().unwrap().cash;

        let prices: BTreeMap<String, f64> =
            [("A".to_string(), 89.0), ("B".to_string(), 89.0)].into_iter().collect();
        assert!(exec.mark_and_trigger(&prices, date(), now()).is_err());

        let logged = sink.trades.lock().unwrap().clone();
        assert_eq!(logged.len(), 3);
        assert_eq!(logged[2].trade.symbol, "A");

        let snapshot = exec.snapshot().unwrap();
        assert!(!snapshot.has_position("A"));
        assert!(snapshot.has_position("B"));
        let proceeds = logged[2].trade.quantity as f64 * logged[2].trade.price
            - logged[2].trade.commission;
        assert!((snapshot.cash - (cash_before + proceeds)).abs() < 1e-9);
    }
}
