//! Rules: condition groups, signal types and strategy families.
//!
//! A rule owns one or more groups. Each group is an ordered list of
//! conditions chained by AND/OR; the chain folds into a [`LogicExpr`] where
//! AND binds tighter than OR.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::domain::condition::{Condition, Relation};
use crate::domain::error::SignalbotError;
use crate::domain::indicator::IndicatorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    Buy,
    Sell,
    /// Informational; contributes reasons but never direction.
    Alert,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalType::Buy => "BUY",
            SignalType::Sell => "SELL",
            SignalType::Alert => "ALERT",
        })
    }
}

impl FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(SignalType::Buy),
            "SELL" => Ok(SignalType::Sell),
            "ALERT" => Ok(SignalType::Alert),
            other => Err(format!("unknown signal type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StrategyFamily {
    Momentum,
    TrendFollowing,
    MeanReversion,
    Breakout,
    Custom,
}

impl StrategyFamily {
    /// Families blended by the composite aggregator.
    pub const BLENDED: [StrategyFamily; 4] = [
        StrategyFamily::Momentum,
        StrategyFamily::TrendFollowing,
        StrategyFamily::MeanReversion,
        StrategyFamily::Breakout,
    ];
}

impl fmt::Display for StrategyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrategyFamily::Momentum => "momentum",
            StrategyFamily::TrendFollowing => "trend_following",
            StrategyFamily::MeanReversion => "mean_reversion",
            StrategyFamily::Breakout => "breakout",
            StrategyFamily::Custom => "custom",
        })
    }
}

impl FromStr for StrategyFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "momentum" => Ok(StrategyFamily::Momentum),
            "trend" | "trend_following" => Ok(StrategyFamily::TrendFollowing),
            "mean_reversion" => Ok(StrategyFamily::MeanReversion),
            "breakout" => Ok(StrategyFamily::Breakout),
            "custom" => Ok(StrategyFamily::Custom),
            other => Err(format!("unknown strategy family '{}'", other)),
        }
    }
}

/// Boolean structure of a group, over condition indices.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicExpr {
    Leaf(usize),
    And(Vec<LogicExpr>),
    Or(Vec<LogicExpr>),
}

impl LogicExpr {
    /// Fold a left-to-right AND/OR chain. The relation on condition `i` joins
    /// it to condition `i + 1`; the last relation is ignored.
    pub fn fold(conditions: &[Condition]) -> LogicExpr {
        let mut terms: Vec<LogicExpr> = Vec::new();
        let mut conjunction: Vec<LogicExpr> = Vec::new();

        for (i, condition) in conditions.iter().enumerate() {
            conjunction.push(LogicExpr::Leaf(i));
            let last = i + 1 == conditions.len();
            if last || condition.relation == Relation::Or {
                terms.push(Self::collapse(std::mem::take(&mut conjunction), LogicExpr::And));
            }
        }

        Self::collapse(terms, LogicExpr::Or)
    }

    fn collapse(mut items: Vec<LogicExpr>, wrap: fn(Vec<LogicExpr>) -> LogicExpr) -> LogicExpr {
        if items.len() == 1 {
            items.remove(0)
        } else {
            wrap(items)
        }
    }

    pub fn eval(&self, passed: &[bool]) -> bool {
        match self {
            LogicExpr::Leaf(i) => passed.get(*i).copied().unwrap_or(false),
            LogicExpr::And(items) => items.iter().all(|e| e.eval(passed)),
            LogicExpr::Or(items) => items.iter().any(|e| e.eval(passed)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub name: String,
    pub label: String,
    pub signal_type: SignalType,
    pub conditions: Vec<Condition>,
    pub active: bool,
    /// Lower evaluates first.
    pub priority: i32,
}

impl ConditionGroup {
    pub fn new(name: &str, signal_type: SignalType, conditions: Vec<Condition>) -> Self {
        ConditionGroup {
            name: name.to_string(),
            label: name.to_string(),
            signal_type,
            conditions,
            active: true,
            priority: 0,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn logic(&self) -> LogicExpr {
        LogicExpr::fold(&self.conditions)
    }

    pub fn total_weight(&self) -> u32 {
        self.conditions.iter().map(|c| c.weight).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub groups: Vec<ConditionGroup>,
    /// Minimum winning-side strength to fire, in [0, 100].
    pub min_score: f64,
    /// Percent above entry for the target price.
    pub target_pct: f64,
    /// Percent below entry for the stop-loss price.
    pub stop_loss_pct: f64,
    pub family: StrategyFamily,
    pub active: bool,
}

impl Rule {
    pub fn new(id: &str, family: StrategyFamily, groups: Vec<ConditionGroup>) -> Self {
        Rule {
            id: id.to_string(),
            name: id.to_string(),
            groups,
            min_score: 60.0,
            target_pct: 10.0,
            stop_loss_pct: 5.0,
            family,
            active: true,
        }
    }

    /// Active groups by priority; declaration order breaks ties.
    pub fn ordered_groups(&self) -> Vec<&ConditionGroup> {
        let mut groups: Vec<&ConditionGroup> = self.groups.iter().filter(|g| g.active).collect();
        groups.sort_by_key(|g| g.priority);
        groups
    }

    /// Every indicator read by an active group.
    pub fn required_indicators(&self) -> BTreeSet<IndicatorKind> {
        self.ordered_groups()
            .into_iter()
            .flat_map(|g| g.conditions.iter())
            .flat_map(|c| c.indicators())
            .collect()
    }

    pub fn validate(&self) -> Result<(), SignalbotError> {
        let fail = |reason: String| {
            Err(SignalbotError::configuration(format!("rule '{}': {}", self.id, reason)))
        };

        if self.id.trim().is_empty() {
            return Err(SignalbotError::configuration("rule id must not be empty"));
        }
        if !(0.0..=100.0).contains(&self.min_score) {
            return fail(format!("min_score {} must be within [0, 100]", self.min_score));
        }
        if !(self.target_pct > 0.0) {
            return fail(format!("target_pct {} must be positive", self.target_pct));
        }
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct < 100.0) {
            return fail(format!("stop_loss_pct {} must be within (0, 100)", self.stop_loss_pct));
        }
        if self.groups.is_empty() {
            return fail("no condition groups".to_string());
        }
        for group in &self.groups {
            if group.conditions.is_empty() {
                return fail(format!("group '{}' has no conditions", group.name));
            }
            for condition in &group.conditions {
                if let Err(reason) = condition.validate() {
                    return fail(format!("group '{}': {}", group.name, reason));
                }
            }
        }
        Ok(())
    }
}
