//! Trade execution: risk-based sizing, commission, fills and exit triggers.
//!
//! Shared by the backtest simulator and the live executor. Every fill
//! produces a [`SimulatedTrade`]; entries carry zero realized P&L and exits
//! carry both commissions, so the ledger's realized P&L sums to the change in
//! cash once all positions are closed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::portfolio::Portfolio;
use super::position::{Position, RoundTrip};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Fraction of notional charged per fill, in [0, 1).
    pub commission_rate: f64,
    /// Fraction of current equity put at risk per entry, in (0, 1].
    pub risk_per_trade: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            commission_rate: 0.00015,
            risk_per_trade: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedTrade {
    pub symbol: String,
    pub side: TradeSide,
    pub date: NaiveDate,
    pub quantity: i64,
    pub price: f64,
    pub commission: f64,
    pub realized_pnl: f64,
    pub reason: String,
}

impl SimulatedTrade {
    pub fn notional(&self) -> f64 {
        self.quantity as f64 * self.price
    }
}

/// Why an entry was not placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SizingRejection {
    /// Risk budget buys less than one share, or the stop is not below price.
    ZeroQuantity,
    InsufficientCash { required: f64, available: f64 },
}

impl fmt::Display for SizingRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizingRejection::ZeroQuantity => write!(f, "sized to zero shares"),
            SizingRejection::InsufficientCash {
                required,
                available,
            } => write!(f, "needs {:.2} but only {:.2} cash available", required, available),
        }
    }
}

pub fn calculate_commission(notional: f64, rate: f64) -> f64 {
    notional * rate
}

/// `floor(capital * risk / (price - stop))`, or zero when the stop is not
/// below the entry price.
pub fn size_position(capital: f64, risk_per_trade: f64, price: f64, stop_loss: f64) -> i64 {
    let risk_per_share = price - stop_loss;
    if !(risk_per_share > 0.0) || !(capital > 0.0) {
        return 0;
    }
    (capital * risk_per_trade / risk_per_share).floor() as i64
}

/// Buy `quantity` shares. Adding to an existing position averages its cost.
#[allow(clippy::too_many_arguments)]
pub fn enter_long(
    portfolio: &mut Portfolio,
    symbol: &str,
    quantity: i64,
    price: f64,
    date: NaiveDate,
    stop_loss: f64,
    target: f64,
    config: &ExecutionConfig,
    reason: &str,
) -> Result<SimulatedTrade, SizingRejection> {
    if quantity <= 0 {
        return Err(SizingRejection::ZeroQuantity);
    }

    let cost = quantity as f64 * price;
    let commission = calculate_commission(cost, config.commission_rate);
    let total_cost = cost + commission;
    if total_cost > portfolio.cash {
        return Err(SizingRejection::InsufficientCash {
            required: total_cost,
            available: portfolio.cash,
        });
    }

    portfolio.cash -= total_cost;

    match portfolio.get_position_mut(symbol) {
        Some(existing) => {
            let held = existing.quantity as f64;
            existing.average_cost = (existing.cost_basis() + cost) / (held + quantity as f64);
            existing.quantity += quantity;
            existing.entry_commission += commission;
            existing.stop_loss = stop_loss;
            existing.target = target;
            existing.mark(price);
        }
        None => portfolio.add_position(Position {
            symbol: symbol.to_string(),
            quantity,
            average_cost: price,
            current_price: price,
            entry_date: date,
            stop_loss,
            target,
            entry_commission: commission,
        }),
    }

    Ok(SimulatedTrade {
        symbol: symbol.to_string(),
        side: TradeSide::Buy,
        date,
        quantity,
        price,
        commission,
        realized_pnl: 0.0,
        reason: reason.to_string(),
    })
}

/// Sell up to `quantity` shares of `symbol`. Returns `None` without a position.
pub fn reduce_position(
    portfolio: &mut Portfolio,
    symbol: &str,
    quantity: i64,
    price: f64,
    date: NaiveDate,
    config: &ExecutionConfig,
    reason: &str,
) -> Option<SimulatedTrade> {
    let position = portfolio.get_position(symbol)?.clone();
    let sold = quantity.min(position.quantity);
    if sold <= 0 {
        return None;
    }

    let fraction = sold as f64 / position.quantity as f64;
    let entry_commission = position.entry_commission * fraction;
    let proceeds = sold as f64 * price;
    let exit_commission = calculate_commission(proceeds, config.commission_rate);
    let pnl = sold as f64 * (price - position.average_cost) - entry_commission - exit_commission;

    portfolio.cash += proceeds - exit_commission;

    if sold == position.quantity {
        portfolio.remove_position(symbol);
    } else if let Some(remaining) = portfolio.get_position_mut(symbol) {
        remaining.quantity -= sold;
        remaining.entry_commission -= entry_commission;
        remaining.mark(price);
    }

    portfolio.record_round_trip(RoundTrip {
        symbol: symbol.to_string(),
        quantity: sold,
        entry_price: position.average_cost,
        exit_price: price,
        entry_date: position.entry_date,
        exit_date: date,
        pnl,
    });

    Some(SimulatedTrade {
        symbol: symbol.to_string(),
        side: TradeSide::Sell,
        date,
        quantity: sold,
        price,
        commission: exit_commission,
        realized_pnl: pnl,
        reason: reason.to_string(),
    })
}

/// Close the whole position.
pub fn exit_position(
    portfolio: &mut Portfolio,
    symbol: &str,
    price: f64,
    date: NaiveDate,
    config: &ExecutionConfig,
    reason: &str,
) -> Option<SimulatedTrade> {
    let quantity = portfolio.get_position(symbol)?.quantity;
    reduce_position(portfolio, symbol, quantity, price, date, config, reason)
}

/// Exit every position whose stop-loss or target is hit at today's price.
///
/// Triggered symbols are collected first, then exited in symbol order.
pub fn check_triggers(
    portfolio: &mut Portfolio,
    prices: &BTreeMap<String, f64>,
    date: NaiveDate,
    config: &ExecutionConfig,
) -> Vec<SimulatedTrade> {
    let triggered: Vec<(String, f64, &'static str)> = portfolio
        .positions
        .values()
        .filter_map(|pos| {
            let price = *prices.get(&pos.symbol)?;
            if pos.should_stop_loss(price) {
                Some((pos.symbol.clone(), price, "stop-loss hit"))
            } else if pos.should_take_profit(price) {
                Some((pos.symbol.clone(), price, "target reached"))
            } else {
                None
            }
        })
        .collect();

    triggered
        .into_iter()
        .filter_map(|(symbol, price, reason)| {
            exit_position(portfolio, &symbol, price, date, config, reason)
        })
        .collect()
}
