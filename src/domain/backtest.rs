//! Backtest engine and event loop.
//!
//! A run moves through `Initializing -> Running -> Finalizing -> Completed`,
//! or stops in `Failed` on invalid input or corrupt history. Each run owns
//! its indicator cache and portfolio; [`run_batch`] executes independent
//! runs in parallel.

use chrono::{Duration, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

use crate::domain::config_validation::BacktestSettings;
use crate::domain::error::SignalbotError;
use crate::domain::evaluator::{signal_at, Strategy};
use crate::domain::execution::{
    check_triggers, enter_long, exit_position, size_position, ExecutionConfig, SimulatedTrade,
    SizingRejection,
};
use crate::domain::metrics::Metrics;
use crate::domain::portfolio::{EquityPoint, Portfolio};
use crate::domain::position::RoundTrip;
use crate::domain::signal::{Classification, Direction, Signal};
use crate::domain::snapshot::IndicatorCache;
use crate::domain::universe::{load_universe, SkippedSymbol};
use crate::ports::price_history_port::PriceHistoryPort;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestRun {
    pub id: String,
    pub strategy: Strategy,
    pub symbols: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_capital: f64,
    pub execution: ExecutionConfig,
    pub risk_free_rate: f64,
    /// Calendar days of history loaded before `start` for indicator warmup.
    pub warmup_days: i64,
}

impl BacktestRun {
    pub fn from_settings(id: &str, strategy: Strategy, settings: &BacktestSettings) -> Self {
        BacktestRun {
            id: id.to_string(),
            strategy,
            symbols: settings.symbols.clone(),
            start: settings.start_date,
            end: settings.end_date,
            initial_capital: settings.initial_capital,
            execution: settings.execution.clone(),
            risk_free_rate: settings.risk_free_rate,
            warmup_days: settings.warmup_days,
        }
    }

    pub fn validate(&self) -> Result<(), SignalbotError> {
        if self.start >= self.end {
            return Err(SignalbotError::configuration(format!(
                "run '{}': start {} must be before end {}",
                self.id, self.start, self.end
            )));
        }
        if self.symbols.is_empty() {
            return Err(SignalbotError::configuration(format!(
                "run '{}': empty universe",
                self.id
            )));
        }
        if !(self.initial_capital > 0.0) {
            return Err(SignalbotError::configuration(format!(
                "run '{}': initial capital must be positive",
                self.id
            )));
        }
        if !(0.0..1.0).contains(&self.execution.commission_rate) {
            return Err(SignalbotError::configuration(format!(
                "run '{}': commission rate must be in [0, 1)",
                self.id
            )));
        }
        let risk = self.execution.risk_per_trade;
        if !(risk > 0.0 && risk <= 1.0) {
            return Err(SignalbotError::configuration(format!(
                "run '{}': risk per trade must be in (0, 1]",
                self.id
            )));
        }
        if self.warmup_days < 0 {
            return Err(SignalbotError::configuration(format!(
                "run '{}': warmup days must be non-negative",
                self.id
            )));
        }
        self.strategy.validate()
    }

    fn history_start(&self) -> NaiveDate {
        self.start - Duration::days(self.warmup_days)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Initializing,
    Running,
    Finalizing,
    Completed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Initializing => "initializing",
            RunState::Running => "running",
            RunState::Finalizing => "finalizing",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        })
    }
}

/// A fired signal that did not become a trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSignal {
    pub symbol: String,
    pub date: NaiveDate,
    pub classification: Classification,
    pub rejection: SizingRejection,
}

/// A bar that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredSignal {
    pub symbol: String,
    pub date: NaiveDate,
    pub direction: Direction,
    pub classification: Classification,
    pub score: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub run_id: String,
    pub strategy_id: String,
    pub state: RunState,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub symbols: Vec<String>,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_trades: usize,
    pub metrics: Metrics,
    pub trades: Vec<SimulatedTrade>,
    pub round_trips: Vec<RoundTrip>,
    pub equity_curve: Vec<EquityPoint>,
    pub signals: Vec<FiredSignal>,
    pub skipped_signals: Vec<SkippedSignal>,
    pub skipped_bars: Vec<SkippedBar>,
    /// Symbols dropped while loading history.
    pub skipped_symbols: Vec<String>,
}

impl BacktestReport {
    pub fn realized_pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.realized_pnl).sum()
    }
}

struct Simulation<'a> {
    run: &'a BacktestRun,
    state: RunState,
    cache: IndicatorCache,
    portfolio: Portfolio,
    trades: Vec<SimulatedTrade>,
    signals: Vec<FiredSignal>,
    skipped_signals: Vec<SkippedSignal>,
    skipped_bars: Vec<SkippedBar>,
    skipped_symbols: Vec<SkippedSymbol>,
}

impl<'a> Simulation<'a> {
    fn new(run: &'a BacktestRun) -> Self {
        Simulation {
            run,
            state: RunState::Initializing,
            cache: IndicatorCache::new(),
            portfolio: Portfolio::new(run.initial_capital),
            trades: Vec::new(),
            signals: Vec::new(),
            skipped_signals: Vec::new(),
            skipped_bars: Vec::new(),
            skipped_symbols: Vec::new(),
        }
    }

    fn transition(&mut self, next: RunState) {
        debug!(run = %self.run.id, from = %self.state, to = %next, "run state");
        self.state = next;
    }

    fn initialize(&mut self, provider: &dyn PriceHistoryPort) -> Result<(), SignalbotError> {
        self.run.validate()?;

        let loaded = load_universe(
            provider,
            &self.run.symbols,
            self.run.history_start(),
            self.run.end,
        )?;
        self.skipped_symbols = loaded.skipped;

        let kinds = self.run.strategy.required_indicators();
        for (symbol, bars) in loaded.histories {
            self.cache.insert(&symbol, bars, &kinds);
        }
        self.cache.apply_ranks(&kinds);
        Ok(())
    }

    fn timeline(&self) -> Vec<NaiveDate> {
        self.cache
            .timeline()
            .into_iter()
            .filter(|d| *d >= self.run.start && *d <= self.run.end)
            .collect()
    }

    fn step(&mut self, date: NaiveDate) -> Result<(), SignalbotError> {
        let prices: BTreeMap<String, f64> = self
            .cache
            .iter()
            .filter_map(|sd| sd.get_bar(date).map(|bar| (sd.symbol.clone(), bar.close)))
            .collect();
        self.portfolio.mark(&prices);

        let exits = check_triggers(&mut self.portfolio, &prices, date, &self.run.execution);
        for exit in &exits {
            debug!(
                run = %self.run.id,
                symbol = %exit.symbol,
                %date,
                reason = %exit.reason,
                "triggered exit"
            );
        }
        self.trades.extend(exits);

        let warmup = self.run.strategy.warmup_indicators();
        let mut fired: Vec<Signal> = Vec::new();
        for data in self.cache.iter() {
            let Some(index) = data.get_bar_index(date) else {
                continue;
            };
            match signal_at(&self.run.strategy, data, index, &warmup) {
                Ok(signal) if signal.fired.is_some() => fired.push(signal),
                Ok(_) => {}
                Err(SignalbotError::DataGap { symbol, date, reason }) => {
                    self.skipped_bars.push(SkippedBar { symbol, date, reason });
                }
                Err(err) => return Err(err),
            }
        }

        for signal in fired {
            self.act_on(&signal);
        }

        let equity = self.portfolio.total_equity();
        self.portfolio.record_equity(date, equity);
        Ok(())
    }

    fn act_on(&mut self, signal: &Signal) {
        let Some(direction) = signal.fired else {
            return;
        };
        self.signals.push(FiredSignal {
            symbol: signal.symbol.clone(),
            date: signal.as_of,
            direction,
            classification: signal.classification,
            score: signal.score,
            confidence: signal.confidence,
        });

        let reason = format!("{} {}", signal.source, signal.classification);
        let held = self.portfolio.has_position(&signal.symbol);
        match direction {
            Direction::Sell if held => {
                if let Some(trade) = exit_position(
                    &mut self.portfolio,
                    &signal.symbol,
                    signal.close,
                    signal.as_of,
                    &self.run.execution,
                    &reason,
                ) {
                    self.trades.push(trade);
                }
            }
            Direction::Buy if !held => {
                let quantity = size_position(
                    self.portfolio.total_equity(),
                    self.run.execution.risk_per_trade,
                    signal.close,
                    signal.stop_loss_price,
                );
                match enter_long(
                    &mut self.portfolio,
                    &signal.symbol,
                    quantity,
                    signal.close,
                    signal.as_of,
                    signal.stop_loss_price,
                    signal.target_price,
                    &self.run.execution,
                    &reason,
                ) {
                    Ok(trade) => self.trades.push(trade),
                    Err(rejection) => {
                        debug!(
                            run = %self.run.id,
                            symbol = %signal.symbol,
                            date = %signal.as_of,
                            %rejection,
                            "signal skipped"
                        );
                        self.skipped_signals.push(SkippedSignal {
                            symbol: signal.symbol.clone(),
                            date: signal.as_of,
                            classification: signal.classification,
                            rejection,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    /// Close every open position at its last close on or before the end.
    fn liquidate(&mut self, last_date: NaiveDate) {
        let open: Vec<String> = self.portfolio.positions.keys().cloned().collect();
        for symbol in open {
            let Some(bar) = self
                .cache
                .get(&symbol)
                .and_then(|sd| sd.last_bar_on_or_before(self.run.end))
            else {
                continue;
            };
            let price = bar.close;
            if let Some(trade) = exit_position(
                &mut self.portfolio,
                &symbol,
                price,
                last_date,
                &self.run.execution,
                "end of backtest",
            ) {
                self.trades.push(trade);
            }
        }

        let equity = self.portfolio.total_equity();
        if let Some(last) = self.portfolio.equity_curve.last_mut() {
            last.equity = equity;
        }
    }

    fn finish(self) -> BacktestReport {
        let metrics = Metrics::compute(&self.portfolio, self.run.risk_free_rate);
        BacktestReport {
            run_id: self.run.id.clone(),
            strategy_id: self.run.strategy.id().to_string(),
            state: self.state,
            start: self.run.start,
            end: self.run.end,
            symbols: self.cache.iter().map(|sd| sd.symbol.clone()).collect(),
            initial_capital: self.run.initial_capital,
            final_capital: self.portfolio.total_equity(),
            total_trades: self.trades.len(),
            metrics,
            trades: self.trades,
            round_trips: self.portfolio.round_trips,
            equity_curve: self.portfolio.equity_curve,
            signals: self.signals,
            skipped_signals: self.skipped_signals,
            skipped_bars: self.skipped_bars,
            skipped_symbols: self.skipped_symbols.into_iter().map(|s| s.symbol).collect(),
        }
    }
}

/// Replay `run` over the provider's history.
///
/// Corrupt history or an invalid run is an error and yields no report.
pub fn run_backtest(
    run: &BacktestRun,
    provider: &dyn PriceHistoryPort,
) -> Result<BacktestReport, SignalbotError> {
    let mut sim = Simulation::new(run);
    match drive(&mut sim, provider) {
        Ok(()) => {
            let report = sim.finish();
            info!(
                run = %report.run_id,
                trades = report.total_trades,
                final_capital = report.final_capital,
                total_return = report.metrics.total_return,
                "backtest completed"
            );
            Ok(report)
        }
        Err(err) => {
            sim.transition(RunState::Failed);
            warn!(run = %run.id, error = %err, "backtest failed");
            Err(err)
        }
    }
}

fn drive(sim: &mut Simulation<'_>, provider: &dyn PriceHistoryPort) -> Result<(), SignalbotError> {
    sim.initialize(provider)?;

    let timeline = sim.timeline();
    info!(
        run = %sim.run.id,
        strategy = %sim.run.strategy.id(),
        symbols = sim.cache.len(),
        dates = timeline.len(),
        start = %sim.run.start,
        end = %sim.run.end,
        "backtest started"
    );

    sim.transition(RunState::Running);
    for date in &timeline {
        sim.step(*date)?;
    }

    sim.transition(RunState::Finalizing);
    if let Some(last) = timeline.last() {
        sim.liquidate(*last);
    }
    if !sim.skipped_bars.is_empty() {
        debug!(run = %sim.run.id, count = sim.skipped_bars.len(), "bars skipped for warmup");
    }

    sim.transition(RunState::Completed);
    Ok(())
}

/// Run independent backtests in parallel. Results keep the input order.
pub fn run_batch(
    runs: &[BacktestRun],
    provider: &dyn PriceHistoryPort,
) -> Vec<Result<BacktestReport, SignalbotError>> {
    runs.par_iter()
        .map(|run| run_backtest(run, provider))
        .collect()
}
