//! Port traits the domain depends on. Adapters implement them.

pub mod config_port;
pub mod price_history_port;
pub mod report_port;
pub mod rule_store_port;
pub mod trade_sink_port;
