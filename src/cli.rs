//! CLI definition and dispatch.

use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::ini_rule_store::{condition_entries, IniRuleStore};
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::domain::backtest::{run_batch, BacktestReport, BacktestRun};
use crate::domain::composite::builtin_rules;
use crate::domain::condition_parser::{parse_condition, render_condition};
use crate::domain::config_validation::{
    BacktestSettings, CompositeSettings, LoggingSettings, DEFAULT_LOOKBACK_DAYS,
};
use crate::domain::error::SignalbotError;
use crate::domain::evaluator::{evaluate, Strategy};
use crate::domain::rule::{Rule, StrategyFamily};
use crate::ports::config_port::ConfigPort;
use crate::ports::price_history_port::PriceHistoryPort;
use crate::ports::report_port::ReportPort;
use crate::ports::rule_store_port::RuleStorePort;

const DEFAULT_DATA_DIR: &str = "data";

#[derive(Parser, Debug)]
#[command(name = "signalbot", about = "Rule-based trading signals, backtests and a live scanner")]
pub struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate one symbol as of a date
    Evaluate {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        rules: PathBuf,
        #[arg(long)]
        symbol: String,
        /// Defaults to the last bar on file
        #[arg(long)]
        as_of: Option<NaiveDate>,
        /// Evaluate a single rule instead of the composite
        #[arg(long)]
        rule: Option<String>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Replay history for every active rule plus the composite
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        rules: PathBuf,
        /// JSON report path; one file per run when several run
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Run only this rule
        #[arg(long, conflicts_with = "composite")]
        rule: Option<String>,
        /// Run only the composite
        #[arg(long)]
        composite: bool,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Run the live scanner until interrupted
    #[cfg(feature = "scanner")]
    Scan {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        rules: PathBuf,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Check a config file and/or a rules file
    Validate {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        rules: Option<PathBuf>,
    },
    /// List rules in a rules file
    Rules {
        #[arg(short, long)]
        rules: PathBuf,
    },
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        match &self.command {
            Command::Evaluate { config, .. } | Command::Backtest { config, .. } => {
                Some(config.as_path())
            }
            #[cfg(feature = "scanner")]
            Command::Scan { config, .. } => Some(config.as_path()),
            Command::Validate { config, .. } => config.as_deref(),
            Command::Rules { .. } => None,
        }
    }
}

/// Filter used when RUST_LOG is unset: `--verbose`, then `[logging] level`.
pub fn default_log_level(cli: &Cli) -> String {
    if cli.verbose {
        return "debug".to_string();
    }
    cli.config_path()
        .and_then(|path| FileConfigAdapter::from_file(path).ok())
        .and_then(|config| LoggingSettings::from_config(&config).ok())
        .map(|settings| settings.level)
        .unwrap_or_else(|| "info".to_string())
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Evaluate {
            config,
            rules,
            symbol,
            as_of,
            rule,
            data_dir,
        } => run_evaluate(&config, &rules, &symbol, as_of, rule.as_deref(), data_dir),
        Command::Backtest {
            config,
            rules,
            output,
            rule,
            composite,
            data_dir,
        } => run_backtest(&config, &rules, output.as_deref(), rule.as_deref(), composite, data_dir),
        #[cfg(feature = "scanner")]
        Command::Scan {
            config,
            rules,
            data_dir,
        } => run_scan(&config, &rules, data_dir),
        Command::Validate { config, rules } => run_validate(config.as_deref(), rules.as_deref()),
        Command::Rules { rules } => run_list_rules(&rules),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

fn load_rules(path: &Path) -> Result<IniRuleStore, SignalbotError> {
    eprintln!("Loading rules from {}", path.display());
    IniRuleStore::from_config(&FileConfigAdapter::from_file(path)?)
}

fn data_source(
    data_dir: Option<PathBuf>,
    configured: Option<PathBuf>,
) -> Result<CsvAdapter, SignalbotError> {
    let dir = data_dir
        .or(configured)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    if !dir.is_dir() {
        return Err(SignalbotError::DataSource {
            reason: format!("data directory {} not found", dir.display()),
        });
    }
    Ok(CsvAdapter::new(dir))
}

/// Built-in family rules, replaced by any file rule of the same family.
pub fn composite_rules(file_rules: &[Rule]) -> Result<Vec<Rule>, SignalbotError> {
    let mut rules = builtin_rules()?;
    let mut replaced = BTreeSet::new();
    for rule in file_rules
        .iter()
        .filter(|r| r.active && r.family != StrategyFamily::Custom)
    {
        if !replaced.insert(rule.family) {
            warn!(
                family = %rule.family,
                rule = %rule.id,
                "several rules for one family, last wins"
            );
        }
        match rules.iter_mut().find(|r| r.family == rule.family) {
            Some(slot) => *slot = rule.clone(),
            None => rules.push(rule.clone()),
        }
    }
    Ok(rules)
}

fn composite_strategy(
    config: &dyn ConfigPort,
    file_rules: &[Rule],
) -> Result<Strategy, SignalbotError> {
    let settings = CompositeSettings::from_config(config)?;
    let strategy = Strategy::Composite(settings.build(composite_rules(file_rules)?));
    strategy.validate()?;
    Ok(strategy)
}

fn find_rule(store: &IniRuleStore, id: &str) -> Result<Rule, SignalbotError> {
    store
        .get_rule(&id.to_lowercase())?
        .ok_or_else(|| SignalbotError::configuration(format!("no rule '{}' in rules file", id)))
}

fn run_evaluate(
    config_path: &Path,
    rules_path: &Path,
    symbol: &str,
    as_of: Option<NaiveDate>,
    rule_id: Option<&str>,
    data_dir: Option<PathBuf>,
) -> Result<ExitCode, SignalbotError> {
    let config = FileConfigAdapter::from_file(config_path)?;
    let store = load_rules(rules_path)?;
    let strategy = match rule_id {
        Some(id) => Strategy::Rule(find_rule(&store, id)?),
        None => composite_strategy(&config, &store.load_rules()?)?,
    };
    let configured = config.get_string("backtest", "data_dir").map(PathBuf::from);
    let provider = data_source(data_dir, configured)?;

    let symbol = symbol.trim().to_uppercase();
    let as_of = match as_of {
        Some(date) => date,
        None => match provider.get_data_range(&symbol)? {
            Some((_, last, _)) => last,
            None => return Err(SignalbotError::NoData { symbol }),
        },
    };
    let start = as_of - Duration::days(DEFAULT_LOOKBACK_DAYS);
    let history = provider.fetch_bars(&symbol, start, as_of)?;

    eprintln!("Evaluating {} as of {} with {}", symbol, as_of, strategy.source());
    let signal = evaluate(&history, &symbol, as_of, &strategy)?;

    eprintln!(
        "  {} score {:.1} strength {:.1} confidence {:.2}",
        signal.classification, signal.score, signal.strength, signal.confidence
    );
    match signal.fired {
        Some(direction) => eprintln!(
            "  fired {} at {:.2}, target {:.2}, stop {:.2}",
            direction, signal.close, signal.target_price, signal.stop_loss_price
        ),
        None => eprintln!("  no signal fired"),
    }
    for reason in &signal.reasons {
        eprintln!("  - {}", reason);
    }
    println!("{}", serde_json::to_string_pretty(&signal)?);
    Ok(ExitCode::SUCCESS)
}

fn run_backtest(
    config_path: &Path,
    rules_path: &Path,
    output: Option<&Path>,
    rule_id: Option<&str>,
    composite_only: bool,
    data_dir: Option<PathBuf>,
) -> Result<ExitCode, SignalbotError> {
    eprintln!("Loading config from {}", config_path.display());
    let config = FileConfigAdapter::from_file(config_path)?;
    let settings = BacktestSettings::from_config(&config)?;
    let store = load_rules(rules_path)?;
    let file_rules = store.active_rules()?;

    let strategies: Vec<Strategy> = match rule_id {
        Some(id) => vec![Strategy::Rule(find_rule(&store, id)?)],
        None if composite_only => vec![composite_strategy(&config, &file_rules)?],
        None => {
            let mut all: Vec<Strategy> = file_rules.iter().cloned().map(Strategy::Rule).collect();
            all.push(composite_strategy(&config, &file_rules)?);
            all
        }
    };

    let provider = data_source(data_dir, settings.data_dir.clone())?;
    let runs: Vec<BacktestRun> = strategies
        .into_iter()
        .map(|s| {
            let id = s.id().to_string();
            BacktestRun::from_settings(&id, s, &settings)
        })
        .collect();

    eprintln!(
        "Running {} backtest(s) over {} symbol(s), {} to {}",
        runs.len(),
        settings.symbols.len(),
        settings.start_date,
        settings.end_date
    );

    let mut reports: Vec<BacktestReport> = Vec::new();
    let mut first_error: Option<SignalbotError> = None;
    for (run, result) in runs.iter().zip(run_batch(&runs, &provider)) {
        match result {
            Ok(report) => {
                print_summary(&report);
                reports.push(report);
            }
            Err(e) => {
                eprintln!("\n{}: failed: {}", run.id, e);
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(path) = output {
        let adapter = JsonReportAdapter::new();
        match reports.as_slice() {
            [] => {}
            [single] => {
                adapter.write(single, path)?;
                eprintln!("\nReport written to {}", path.display());
            }
            many => {
                for written in adapter.write_batch(many, path)? {
                    eprintln!("Report written to {}", written.display());
                }
            }
        }
    }

    match first_error {
        Some(e) => Ok((&e).into()),
        None => Ok(ExitCode::SUCCESS),
    }
}

fn print_summary(report: &BacktestReport) {
    let m = &report.metrics;
    eprintln!("\n{} ({})", report.run_id, report.state);
    eprintln!("  Final capital:  {:.2}", report.final_capital);
    eprintln!("  Total return:   {:.2}%", m.total_return * 100.0);
    eprintln!("  Annualized:     {:.2}%", m.annualized_return * 100.0);
    eprintln!("  Sharpe:         {:.3}", m.sharpe_ratio);
    eprintln!("  Max drawdown:   {:.2}%", m.max_drawdown * 100.0);
    eprintln!("  Trades:         {} ({} round trips)", report.total_trades, m.round_trips);
    eprintln!("  Win rate:       {:.1}%", m.win_rate);
    if !report.skipped_symbols.is_empty() {
        eprintln!("  Skipped:        {}", report.skipped_symbols.join(", "));
    }
    if !report.skipped_signals.is_empty() {
        eprintln!("  Rejected entries: {}", report.skipped_signals.len());
    }
}

#[cfg(feature = "scanner")]
fn run_scan(
    config_path: &Path,
    rules_path: &Path,
    data_dir: Option<PathBuf>,
) -> Result<ExitCode, SignalbotError> {
    use std::sync::Arc;

    use crate::adapters::csv_trade_sink::CsvTradeSink;
    use crate::domain::config_validation::ScannerSettings;
    use crate::domain::live::LiveExecutor;
    use crate::domain::market_hours::SystemClock;
    use crate::scanner::{Scanner, ScannerConfig};

    let config = FileConfigAdapter::from_file(config_path)?;
    let settings = ScannerSettings::from_config(&config)?;
    let store = load_rules(rules_path)?;
    let file_rules = store.active_rules()?;

    let mut strategies: Vec<Strategy> = file_rules.iter().cloned().map(Strategy::Rule).collect();
    strategies.push(composite_strategy(&config, &file_rules)?);

    let configured = config.get_string("backtest", "data_dir").map(PathBuf::from);
    let provider = Arc::new(data_source(data_dir, configured)?);

    let mut executor = LiveExecutor::new(settings.initial_capital, settings.execution.clone());
    if let Some(path) = &settings.trade_log {
        eprintln!("Logging trades to {}", path.display());
        executor = executor.with_sink(Arc::new(CsvTradeSink::open(path)?));
    }
    let executor = Arc::new(executor);

    let mut scanner = Scanner::new(
        ScannerConfig::from(&settings),
        strategies,
        provider,
        Arc::clone(&executor),
        Arc::new(SystemClock),
    )?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        scanner.start()?;
        eprintln!("Scanner running every {}s; Ctrl-C to stop", settings.interval_secs);
        tokio::signal::ctrl_c().await?;
        eprintln!("Stopping scanner...");
        scanner.stop().await?;
        Ok::<(), SignalbotError>(())
    })?;

    let portfolio = executor.snapshot()?;
    eprintln!(
        "Cash {:.2}, equity {:.2}, {} open position(s)",
        portfolio.cash,
        portfolio.total_equity(),
        portfolio.position_count()
    );
    Ok(ExitCode::SUCCESS)
}

fn run_validate(
    config_path: Option<&Path>,
    rules_path: Option<&Path>,
) -> Result<ExitCode, SignalbotError> {
    if config_path.is_none() && rules_path.is_none() {
        return Err(SignalbotError::configuration(
            "nothing to validate; pass --config and/or --rules",
        ));
    }

    if let Some(path) = config_path {
        eprintln!("Validating config: {}", path.display());
        let config = FileConfigAdapter::from_file(path)?;
        let sections = config.sections();
        if sections.iter().any(|s| s == "backtest") {
            let settings = BacktestSettings::from_config(&config)?;
            eprintln!(
                "  [backtest] {} symbol(s), {} to {}",
                settings.symbols.len(),
                settings.start_date,
                settings.end_date
            );
        }
        let composite = CompositeSettings::from_config(&config)?;
        eprintln!("  [composite] {} {:?}", composite.name, composite.weights);
        #[cfg(feature = "scanner")]
        {
            if sections.iter().any(|s| s == "scanner") {
                let settings =
                    crate::domain::config_validation::ScannerSettings::from_config(&config)?;
                eprintln!(
                    "  [scanner] every {}s, {}-{}",
                    settings.interval_secs, settings.market_hours.open, settings.market_hours.close
                );
            }
        }
        LoggingSettings::from_config(&config)?;
    }

    if let Some(path) = rules_path {
        eprintln!("Validating rules: {}", path.display());
        let config = FileConfigAdapter::from_file(path)?;
        let mut current_section = String::new();
        for entry in condition_entries(&config)? {
            if entry.section != current_section {
                eprintln!("\n[{}]", entry.section);
                current_section = entry.section.clone();
            }
            match parse_condition(&entry.raw) {
                Ok(condition) => eprintln!("  {} = {}", entry.key, render_condition(&condition)),
                Err(e) => {
                    eprintln!("  {}: error: {}", entry.key, e.display_with_context(&entry.raw));
                    return Err(e.into());
                }
            }
        }
        let store = IniRuleStore::from_config(&config)?;
        eprintln!("\n{} rule(s) valid.", store.load_rules()?.len());
    }

    eprintln!("\nConfiguration is valid.");
    Ok(ExitCode::SUCCESS)
}

fn run_list_rules(rules_path: &Path) -> Result<ExitCode, SignalbotError> {
    let store = load_rules(rules_path)?;
    let rules = store.load_rules()?;
    if rules.is_empty() {
        eprintln!("No rules defined.");
        return Ok(ExitCode::SUCCESS);
    }
    for rule in rules {
        println!(
            "{:<20} {:<16} {:<8} groups={} min_score={}",
            rule.id,
            rule.family,
            if rule.active { "active" } else { "inactive" },
            rule.groups.len(),
            rule.min_score
        );
    }
    Ok(ExitCode::SUCCESS)
}
