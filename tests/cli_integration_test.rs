//! CLI tests against the built binary.
//!
//! Tests cover:
//! - `validate` on config and rules files, including parse errors
//! - `rules` listing
//! - `backtest` with a CSV data directory and JSON report output
//! - `evaluate` printing a signal as JSON
//! - Exit codes for configuration and data errors

mod common;

use common::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const CONFIG_INI: &str = r#"
[backtest]
start_date = 2024-01-01
end_date = 2024-03-01
symbols = 005930
initial_capital = 100000000
commission_rate = 0.00015
risk_per_trade = 0.02
warmup_days = 0

[composite]
weights = momentum:0.3, trend_following:0.35, mean_reversion:0.2, breakout:0.15

[logging]
level = warn
"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        fs::create_dir(&data).unwrap();

        let mut csv = String::from("date,open,high,low,close,volume\n");
        for bar in make_bars("005930", date(2024, 1, 1), &rise_then_fall_60()) {
            csv.push_str(&format!(
                "{},{},{},{},{},{}\n",
                bar.date, bar.open, bar.high, bar.low, bar.close, bar.volume
            ));
        }
        fs::write(data.join("005930.csv"), csv).unwrap();
        fs::write(dir.path().join("config.ini"), CONFIG_INI).unwrap();
        fs::write(dir.path().join("rules.ini"), RULES_INI).unwrap();
        Workspace { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_signalbot"))
            .current_dir(self.dir.path())
            .args(args)
            .env_remove("RUST_LOG")
            .output()
            .unwrap()
    }
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn write(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
}

mod validate {
    use super::*;

    #[test]
    fn valid_files_pass() {
        let ws = Workspace::new();
        let out = ws.run(&["validate", "--config", "config.ini", "--rules", "rules.ini"]);
        assert!(out.status.success(), "{}", stderr(&out));
        let err = stderr(&out);
        assert!(err.contains("SMA(5) CROSS_ABOVE SMA(20)"));
        assert!(err.contains("1 rule(s) valid"));
    }

    #[test]
    fn parse_error_shows_position() {
        let ws = Workspace::new();
        write(
            &ws.path("bad.ini"),
            "[rule.r]\n[group.r.g]\nsignal_type = BUY\ncondition.1 = SMA(5) ?? SMA(20)\n",
        );
        let out = ws.run(&["validate", "--rules", "bad.ini"]);
        assert_eq!(out.status.code(), Some(4));
        assert!(stderr(&out).contains('^'));
    }

    #[test]
    fn bad_weights_are_a_config_error() {
        let ws = Workspace::new();
        write(&ws.path("c.ini"), "[composite]\nweights = momentum:0.5, breakout:0.1\n");
        let out = ws.run(&["validate", "--config", "c.ini"]);
        assert_eq!(out.status.code(), Some(2));
    }

    #[test]
    fn nothing_to_validate() {
        let ws = Workspace::new();
        let out = ws.run(&["validate"]);
        assert!(!out.status.success());
    }
}

mod rules {
    use super::*;

    #[test]
    fn lists_rules() {
        let ws = Workspace::new();
        let out = ws.run(&["rules", "--rules", "rules.ini"]);
        assert!(out.status.success());
        let stdout = String::from_utf8_lossy(&out.stdout);
        assert!(stdout.contains("sma_cross"));
        assert!(stdout.contains("trend_following"));
    }

    #[test]
    fn missing_file_is_a_config_parse_error() {
        let ws = Workspace::new();
        let out = ws.run(&["rules", "--rules", "nope.ini"]);
        assert_eq!(out.status.code(), Some(2));
    }
}

mod backtest {
    use super::*;

    #[test]
    fn single_rule_writes_report() {
        let ws = Workspace::new();
        let out = ws.run(&[
            "backtest", "-c", "config.ini", "-r", "rules.ini", "--rule", "sma_cross", "-o",
            "out/report.json",
        ]);
        assert!(out.status.success(), "{}", stderr(&out));

        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(ws.path("out/report.json")).unwrap()).unwrap();
        assert_eq!(report["strategy_id"], "sma_cross");
        assert_eq!(report["total_trades"], 2);
        assert_eq!(report["state"], "Completed");
    }

    #[test]
    fn all_strategies_write_one_report_each() {
        let ws = Workspace::new();
        let out = ws.run(&["backtest", "-c", "config.ini", "-r", "rules.ini", "-o", "report.json"]);
        assert!(out.status.success(), "{}", stderr(&out));
        assert!(ws.path("report_sma_cross.json").exists());
        assert!(ws.path("report_default.json").exists());
    }

    #[test]
    fn unknown_rule_is_a_configuration_error() {
        let ws = Workspace::new();
        let out = ws.run(&["backtest", "-c", "config.ini", "-r", "rules.ini", "--rule", "ghost"]);
        assert_eq!(out.status.code(), Some(4));
    }

    #[test]
    fn missing_data_dir_is_a_data_error() {
        let ws = Workspace::new();
        let out = ws.run(&[
            "backtest", "-c", "config.ini", "-r", "rules.ini", "--data-dir", "missing",
        ]);
        assert_eq!(out.status.code(), Some(3));
    }

    #[test]
    fn bad_date_range_is_a_config_error() {
        let ws = Workspace::new();
        write(
            &ws.path("c.ini"),
            &CONFIG_INI.replace("end_date = 2024-03-01", "end_date = 2023-03-01"),
        );
        let out = ws.run(&["backtest", "-c", "c.ini", "-r", "rules.ini"]);
        assert_eq!(out.status.code(), Some(2));
    }
}

mod evaluate {
    use super::*;

    #[test]
    fn prints_signal_json() {
        let ws = Workspace::new();
        let out = ws.run(&[
            "evaluate", "-c", "config.ini", "-r", "rules.ini", "--symbol", "005930", "--rule",
            "sma_cross",
        ]);
        assert!(out.status.success(), "{}", stderr(&out));
        let signal: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
        assert_eq!(signal["symbol"], "005930");
        assert_eq!(signal["as_of"], "2024-02-29");
    }

    #[test]
    fn unknown_symbol_is_no_data() {
        let ws = Workspace::new();
        let out = ws.run(&[
            "evaluate", "-c", "config.ini", "-r", "rules.ini", "--symbol", "XYZ",
        ]);
        assert_eq!(out.status.code(), Some(5));
    }
}
