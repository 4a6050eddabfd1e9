//! Open positions and completed round trips.
//!
//! Positions are long-only. They are changed only by trade execution and
//! dropped from the portfolio once their quantity reaches zero.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub average_cost: f64,
    /// Last marked price.
    pub current_price: f64,
    pub entry_date: NaiveDate,
    pub stop_loss: f64,
    pub target: f64,
    /// Commission paid on the shares still held.
    pub entry_commission: f64,
}

impl Position {
    pub fn market_value(&self) -> f64 {
        self.quantity as f64 * self.current_price
    }

    pub fn cost_basis(&self) -> f64 {
        self.quantity as f64 * self.average_cost
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.quantity as f64 * (self.current_price - self.average_cost)
    }

    pub fn mark(&mut self, price: f64) {
        self.current_price = price;
    }

    pub fn should_stop_loss(&self, price: f64) -> bool {
        self.stop_loss > 0.0 && price <= self.stop_loss
    }

    pub fn should_take_profit(&self, price: f64) -> bool {
        self.target > 0.0 && price >= self.target
    }
}

/// An entry matched with its exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTrip {
    pub symbol: String,
    pub quantity: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    /// Net of both commissions.
    pub pnl: f64,
}

impl RoundTrip {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn holding_days(&self) -> i64 {
        (self.exit_date - self.entry_date).num_days()
    }
}
