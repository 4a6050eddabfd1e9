//! Live scanner: a background task that re-evaluates the universe on a
//! fixed interval during market hours and trades through [`LiveExecutor`].
//!
//! Ticks never overlap. A tick that comes due while the previous one is
//! still running is skipped and logged. [`Scanner::stop`] cancels the
//! schedule and waits for the in-flight tick, so a trade is never cut off
//! halfway.

use chrono::Duration as ChronoDuration;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::config_validation::ScannerSettings;
use crate::domain::error::SignalbotError;
use crate::domain::evaluator::{evaluate_universe, Strategy};
use crate::domain::live::{LiveExecutor, LiveTrade};
use crate::domain::market_hours::{Clock, MarketHours};
use crate::domain::ohlcv::PriceBar;
use crate::ports::price_history_port::PriceHistoryPort;

#[derive(Debug, Clone, PartialEq)]
pub struct ScannerConfig {
    pub interval: Duration,
    pub market_hours: MarketHours,
    pub confidence_threshold: f64,
    /// Calendar days of history fetched per tick.
    pub lookback_days: i64,
    /// Every symbol the provider lists when `None`.
    pub symbols: Option<Vec<String>>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            interval: Duration::from_secs(60),
            market_hours: MarketHours::default(),
            confidence_threshold: 0.7,
            lookback_days: 200,
            symbols: None,
        }
    }
}

impl From<&ScannerSettings> for ScannerConfig {
    fn from(settings: &ScannerSettings) -> Self {
        ScannerConfig {
            interval: Duration::from_secs(settings.interval_secs),
            market_hours: settings.market_hours,
            confidence_threshold: settings.confidence_threshold,
            lookback_days: settings.lookback_days,
            symbols: settings.symbols.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub symbols: usize,
    /// Fired signals at or above the confidence threshold.
    pub actionable: usize,
    pub trades: Vec<LiveTrade>,
    pub errors: Vec<(String, SignalbotError)>,
}

#[derive(Debug)]
pub enum TickOutcome {
    /// The previous tick was still running.
    Skipped,
    MarketClosed,
    Completed(TickReport),
}

struct ScannerCore {
    config: ScannerConfig,
    strategies: Vec<Strategy>,
    provider: Arc<dyn PriceHistoryPort>,
    executor: Arc<LiveExecutor>,
    clock: Arc<dyn Clock>,
    in_flight: AtomicBool,
    skipped: AtomicU64,
}

/// Clears the in-flight flag when the tick ends, including on panic.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ScannerCore {
    fn try_tick(&self) -> Result<TickOutcome, SignalbotError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.skip();
            return Ok(TickOutcome::Skipped);
        }
        let _guard = InFlight(&self.in_flight);
        self.scan()
    }

    fn skip(&self) {
        let skipped = self.skipped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(skipped, "scanner tick skipped, previous tick still running");
    }

    fn scan(&self) -> Result<TickOutcome, SignalbotError> {
        let now = self.clock.now();
        let hours = &self.config.market_hours;
        if !hours.is_open(now) {
            debug!(%now, "market closed, tick idle");
            return Ok(TickOutcome::MarketClosed);
        }

        let as_of = hours.local_date(now);
        let start = as_of - ChronoDuration::days(self.config.lookback_days);
        let symbols = match &self.config.symbols {
            Some(list) => list.clone(),
            None => self.provider.list_symbols()?,
        };

        let mut report = TickReport {
            symbols: symbols.len(),
            ..TickReport::default()
        };

        let mut histories: BTreeMap<String, Vec<PriceBar>> = BTreeMap::new();
        for symbol in symbols {
            match self.provider.fetch_bars(&symbol, start, as_of) {
                Ok(bars) if !bars.is_empty() => {
                    histories.insert(symbol, bars);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%symbol, error = %e, "fetch failed during scan");
                    report.errors.push((symbol, e));
                }
            }
        }

        let latest: BTreeMap<String, f64> = histories
            .iter()
            .filter_map(|(s, bars)| bars.last().map(|b| (s.clone(), b.close)))
            .collect();
        report
            .trades
            .extend(self.executor.mark_and_trigger(&latest, as_of, now)?);

        for strategy in self.strategies.iter().filter(|s| s.is_active()) {
            let evaluation = evaluate_universe(&histories, as_of, strategy)?;
            for (symbol, err) in evaluation.skipped {
                debug!(strategy = %strategy.id(), %symbol, error = %err, "symbol not evaluated");
            }

            for signal in evaluation.signals {
                if signal.fired.is_none() || signal.confidence < self.config.confidence_threshold {
                    continue;
                }
                report.actionable += 1;
                match self.executor.execute_signal(&signal, now) {
                    Ok(Some(trade)) => report.trades.push(trade),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(symbol = %signal.symbol, error = %e, "live execution failed");
                        report.errors.push((signal.symbol.clone(), e));
                    }
                }
            }
        }

        info!(
            %as_of,
            symbols = report.symbols,
            actionable = report.actionable,
            trades = report.trades.len(),
            errors = report.errors.len(),
            "scanner tick"
        );
        Ok(TickOutcome::Completed(report))
    }
}

pub struct Scanner {
    core: Arc<ScannerCore>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Scanner {
    pub fn new(
        config: ScannerConfig,
        strategies: Vec<Strategy>,
        provider: Arc<dyn PriceHistoryPort>,
        executor: Arc<LiveExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SignalbotError> {
        if config.interval.is_zero() {
            return Err(SignalbotError::Scanner {
                reason: "interval must be positive".to_string(),
            });
        }
        for strategy in &strategies {
            strategy.validate()?;
        }
        Ok(Scanner {
            core: Arc::new(ScannerCore {
                config,
                strategies,
                provider,
                executor,
                clock,
                in_flight: AtomicBool::new(false),
                skipped: AtomicU64::new(0),
            }),
            token: CancellationToken::new(),
            handle: None,
        })
    }

    /// Run one tick on the calling thread, honouring the overlap guard.
    pub fn tick(&self) -> Result<TickOutcome, SignalbotError> {
        self.core.try_tick()
    }

    /// Ticks skipped because the previous one was still running.
    pub fn skipped_ticks(&self) -> u64 {
        self.core.skipped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the schedule on the current tokio runtime.
    pub fn start(&mut self) -> Result<(), SignalbotError> {
        if self.is_running() {
            return Err(SignalbotError::Scanner {
                reason: "scanner already running".to_string(),
            });
        }
        self.token = CancellationToken::new();
        let token = self.token.clone();
        let core = Arc::clone(&self.core);

        info!(
            interval_s = core.config.interval.as_secs(),
            strategies = core.strategies.len(),
            "scanner starting"
        );
        self.handle = Some(tokio::spawn(schedule(core, token)));
        Ok(())
    }

    /// Cancel the schedule and wait for the in-flight tick to finish.
    pub async fn stop(&mut self) -> Result<(), SignalbotError> {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await.map_err(|e| SignalbotError::Scanner {
                reason: format!("scanner task failed: {e}"),
            })?;
        }
        info!("scanner stopped");
        Ok(())
    }
}

async fn schedule(core: Arc<ScannerCore>, token: CancellationToken) {
    let mut interval = tokio::time::interval(core.config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut current: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("scanner shutting down");
                break;
            }
            _ = interval.tick() => {
                if current.as_ref().is_some_and(|h| !h.is_finished()) {
                    core.skip();
                    continue;
                }
                let core = Arc::clone(&core);
                current = Some(tokio::task::spawn_blocking(move || {
                    if let Err(e) = core.try_tick() {
                        warn!(error = %e, "scanner tick failed");
                    }
                }));
            }
        }
    }

    if let Some(handle) = current {
        if let Err(e) = handle.await {
            warn!(error = %e, "in-flight tick did not finish cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::ExecutionConfig;
    use crate::domain::market_hours::FixedClock;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    struct EmptyProvider;

    impl PriceHistoryPort for EmptyProvider {
        fn fetch_bars(
            &self,
            _symbol: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<PriceBar>, SignalbotError> {
            Ok(Vec::new())
        }

        fn list_symbols(&self) -> Result<Vec<String>, SignalbotError> {
            Ok(vec!["A".to_string()])
        }

        fn get_data_range(
            &self,
            _symbol: &str,
        ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, SignalbotError> {
            Ok(None)
        }
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, 0, 0).unwrap()
    }

    fn scanner(clock: Arc<FixedClock>) -> Scanner {
        Scanner::new(
            ScannerConfig::default(),
            vec![Strategy::Composite(
                crate::domain::composite::CompositeStrategy::with_defaults().unwrap(),
            )],
            Arc::new(EmptyProvider),
            Arc::new(LiveExecutor::new(1_000_000.0, ExecutionConfig::default())),
            clock,
        )
        .unwrap()
    }

    #[test]
    fn closed_market_is_idle() {
        let s = scanner(Arc::new(FixedClock::new(at(12))));
        assert!(matches!(s.tick().unwrap(), TickOutcome::MarketClosed));
    }

    #[test]
    fn open_market_scans() {
        let s = scanner(Arc::new(FixedClock::new(at(1))));
        match s.tick().unwrap() {
            TickOutcome::Completed(report) => {
                assert_eq!(report.symbols, 1);
                assert!(report.trades.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn overlapping_tick_is_skipped() {
        let s = scanner(Arc::new(FixedClock::new(at(1))));
        s.core.in_flight.store(true, Ordering::SeqCst);
        assert!(matches!(s.tick().unwrap(), TickOutcome::Skipped));
        assert_eq!(s.skipped_ticks(), 1);
        s.core.in_flight.store(false, Ordering::SeqCst);
        assert!(matches!(s.tick().unwrap(), TickOutcome::Completed(_)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = ScannerConfig {
            interval: Duration::ZERO,
            ..ScannerConfig::default()
        };
        let result = Scanner::new(
            config,
            vec![],
            Arc::new(EmptyProvider),
            Arc::new(LiveExecutor::new(1.0, ExecutionConfig::default())),
            Arc::new(FixedClock::new(at(1))),
        );
        assert!(matches!(result, Err(SignalbotError::Scanner { .. })));
    }

    #[tokio::test]
    async fn start_and_stop() {
        let mut s = scanner(Arc::new(FixedClock::new(at(12))));
        assert!(!s.is_running());
        s.start().unwrap();
        assert!(s.is_running());
        assert!(s.start().is_err());
        s.stop().await.unwrap();
        assert!(!s.is_running());
    }
}
