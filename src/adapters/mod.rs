//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod csv_trade_sink;
pub mod file_config_adapter;
pub mod ini_rule_store;
pub mod json_report_adapter;
