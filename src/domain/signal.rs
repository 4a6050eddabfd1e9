//! Signal output, classification breakpoints, ranking and filtering.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub const MAX_REASONS: usize = 5;

/// Score at which neither side has the edge.
pub const NEUTRAL_SCORE: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Classification {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl Classification {
    /// Breakpoints on the 0-100 signed score, symmetric around 50.
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Classification::StrongBuy
        } else if score >= 60.0 {
            Classification::Buy
        } else if score > 40.0 {
            Classification::Hold
        } else if score > 20.0 {
            Classification::Sell
        } else {
            Classification::StrongSell
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            Classification::StrongBuy | Classification::Buy => Some(Direction::Buy),
            Classification::Hold => None,
            Classification::Sell | Classification::StrongSell => Some(Direction::Sell),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Classification::StrongBuy => "STRONG_BUY",
            Classification::Buy => "BUY",
            Classification::Hold => "HOLD",
            Classification::Sell => "SELL",
            Classification::StrongSell => "STRONG_SELL",
        })
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STRONG_BUY" => Ok(Classification::StrongBuy),
            "BUY" => Ok(Classification::Buy),
            "HOLD" => Ok(Classification::Hold),
            "SELL" => Ok(Classification::Sell),
            "STRONG_SELL" => Ok(Classification::StrongSell),
            other => Err(format!("unknown classification '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalSource {
    Rule(String),
    Composite(String),
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalSource::Rule(id) => write!(f, "rule:{}", id),
            SignalSource::Composite(name) => write!(f, "composite:{}", name),
        }
    }
}

/// Result of one evaluation. Built once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub source: SignalSource,
    pub as_of: NaiveDate,
    pub classification: Classification,
    /// Signed score, 50 neutral.
    pub score: f64,
    /// Directional strength of the winning side, 0-100.
    pub strength: f64,
    /// 0-1.
    pub confidence: f64,
    /// Side that fired, if any.
    pub fired: Option<Direction>,
    pub close: f64,
    pub target_price: f64,
    pub stop_loss_price: f64,
    pub reasons: Vec<String>,
    /// close * volume
    pub liquidity: f64,
}

impl Signal {
    pub fn is_buy(&self) -> bool {
        self.fired == Some(Direction::Buy)
    }

    pub fn is_sell(&self) -> bool {
        self.fired == Some(Direction::Sell)
    }
}

/// Target and stop prices for a side; buys and holds price above entry.
pub fn price_levels(
    close: f64,
    direction: Option<Direction>,
    target_pct: f64,
    stop_loss_pct: f64,
) -> (f64, f64) {
    match direction {
        Some(Direction::Sell) => (
            close * (1.0 - target_pct / 100.0),
            close * (1.0 + stop_loss_pct / 100.0),
        ),
        _ => (
            close * (1.0 + target_pct / 100.0),
            close * (1.0 - stop_loss_pct / 100.0),
        ),
    }
}

/// Keep at most [`MAX_REASONS`] distinct reasons, in order.
pub fn cap_reasons(reasons: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(MAX_REASONS);
    for reason in reasons {
        if out.len() == MAX_REASONS {
            break;
        }
        if !out.contains(&reason) {
            out.push(reason);
        }
    }
    out
}

/// Order by score (most bullish first), then confidence, then symbol.
pub fn rank_signals(signals: &mut [Signal]) {
    signals.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
}

/// Post-ranking filter; retains the input order of what it keeps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalFilter {
    pub min_strength: f64,
    pub min_confidence: f64,
    pub min_liquidity: f64,
    /// Empty allows every classification.
    pub classifications: BTreeSet<Classification>,
}

impl SignalFilter {
    pub fn accepts(&self, signal: &Signal) -> bool {
        signal.strength >= self.min_strength
            && signal.confidence >= self.min_confidence
            && signal.liquidity >= self.min_liquidity
            && (self.classifications.is_empty()
                || self.classifications.contains(&signal.classification))
    }

    pub fn apply(&self, signals: &[Signal]) -> Vec<Signal> {
        signals.iter().filter(|s| self.accepts(s)).cloned().collect()
    }
}
