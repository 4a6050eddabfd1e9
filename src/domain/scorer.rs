//! Weighted group scoring and rule-level direction, confidence and reasons.
//!
//! # Group score
//!
//! - a failed `required` condition zeroes the group and fails it
//! - otherwise `score = sum(weight of passing) / sum(weight) * 100`
//! - the group passes when its AND/OR expression holds
//!
//! # Rule
//!
//! BUY and SELL strengths are the best active group score on each side. The
//! stronger side wins (ties hold) and the rule fires when that side's best
//! group passed, its strength reaches `min_score` and the signed score
//! classifies in the same direction. Confidence scales with the margin over
//! the opposing side, not the raw strength.

use serde::Serialize;

use crate::domain::condition::evaluate_condition;
use crate::domain::rule::{ConditionGroup, Rule, SignalType};
use crate::domain::signal::{cap_reasons, Classification, Direction, NEUTRAL_SCORE};
use crate::domain::snapshot::IndicatorSnapshot;

pub const DEFAULT_CORROBORATION_BONUS: f64 = 0.05;

/// Weight of the base strength term that does not depend on degree.
const BASE_CONFIDENCE_SHARE: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupScore {
    pub name: String,
    pub signal_type: SignalType,
    pub score: f64,
    pub passed: bool,
    /// Degrees of the passing conditions.
    pub degrees: Vec<f64>,
    /// Reasons of the passing conditions, in declaration order.
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleScore {
    pub rule_id: String,
    pub buy_strength: f64,
    pub sell_strength: f64,
    /// `50 + (buy - sell) / 2`
    pub score: f64,
    pub direction: Option<Direction>,
    pub fired: bool,
    pub strength: f64,
    pub confidence: f64,
    pub classification: Classification,
    pub reasons: Vec<String>,
    /// Per active group, in evaluation order.
    pub groups: Vec<GroupScore>,
}

pub fn score_group(
    group: &ConditionGroup,
    current: &IndicatorSnapshot,
    previous: Option<&IndicatorSnapshot>,
) -> GroupScore {
    let outcomes: Vec<_> = group
        .conditions
        .iter()
        .map(|c| evaluate_condition(c, current, previous))
        .collect();
    let passed: Vec<bool> = outcomes.iter().map(|o| o.passed()).collect();

    let required_failed = group
        .conditions
        .iter()
        .zip(&passed)
        .any(|(c, ok)| c.required && !ok);

    let total = group.total_weight();
    let passing_weight: u32 = group
        .conditions
        .iter()
        .zip(&passed)
        .filter(|(_, ok)| **ok)
        .map(|(c, _)| c.weight)
        .sum();

    let (score, group_passed) = if required_failed || total == 0 {
        (0.0, false)
    } else {
        (
            passing_weight as f64 / total as f64 * 100.0,
            group.logic().eval(&passed),
        )
    };

    let mut degrees = Vec::new();
    let mut reasons = Vec::new();
    for outcome in outcomes.into_iter().filter(|o| o.passed()) {
        degrees.push(outcome.degree);
        if let Some(reason) = outcome.reason {
            reasons.push(reason);
        }
    }

    GroupScore {
        name: group.name.clone(),
        signal_type: group.signal_type,
        score,
        passed: group_passed,
        degrees,
        reasons,
    }
}

pub fn score_rule(
    rule: &Rule,
    current: &IndicatorSnapshot,
    previous: Option<&IndicatorSnapshot>,
    corroboration_bonus: f64,
) -> RuleScore {
    let groups: Vec<GroupScore> = rule
        .ordered_groups()
        .into_iter()
        .map(|g| score_group(g, current, previous))
        .collect();

    let best = |side: SignalType| -> Option<&GroupScore> {
        groups
            .iter()
            .filter(|g| g.signal_type == side)
            .fold(None, |best: Option<&GroupScore>, g| match best {
                Some(b) if b.score >= g.score => Some(b),
                _ => Some(g),
            })
    };
    let best_buy = best(SignalType::Buy);
    let best_sell = best(SignalType::Sell);
    let buy_strength = best_buy.map_or(0.0, |g| g.score);
    let sell_strength = best_sell.map_or(0.0, |g| g.score);

    let (direction, strength, best_group) = if buy_strength > sell_strength {
        (Some(Direction::Buy), buy_strength, best_buy)
    } else if sell_strength > buy_strength {
        (Some(Direction::Sell), sell_strength, best_sell)
    } else {
        (None, buy_strength, None)
    };

    let score = NEUTRAL_SCORE + (buy_strength - sell_strength) / 2.0;
    let fired = best_group.is_some_and(|g| g.passed)
        && strength >= rule.min_score
        && Classification::from_score(score).direction() == direction;
    let classification = if fired {
        Classification::from_score(score)
    } else {
        Classification::Hold
    };
    let edge = (buy_strength - sell_strength).abs();

    let side_type = direction.map(|d| match d {
        Direction::Buy => SignalType::Buy,
        Direction::Sell => SignalType::Sell,
    });
    let on_side = |g: &&GroupScore| Some(g.signal_type) == side_type;

    let confidence = match side_type {
        Some(_) => {
            let passing: Vec<&GroupScore> =
                groups.iter().filter(on_side).filter(|g| g.passed).collect();
            let degrees: Vec<f64> =
                passing.iter().flat_map(|g| g.degrees.iter().copied()).collect();
            let mean_degree = if degrees.is_empty() {
                0.0
            } else {
                degrees.iter().sum::<f64>() / degrees.len() as f64
            };
            let base = edge / 100.0
                * (BASE_CONFIDENCE_SHARE + (1.0 - BASE_CONFIDENCE_SHARE) * mean_degree);
            let extra = passing.len().saturating_sub(1) as f64 * corroboration_bonus;
            (base + extra).clamp(0.0, 1.0)
        }
        None => 0.0,
    };

    let reasons = cap_reasons(
        groups
            .iter()
            .filter(|g| {
                g.passed && (g.signal_type == SignalType::Alert || Some(g.signal_type) == side_type)
            })
            .flat_map(|g| g.reasons.iter().cloned()),
    );

    RuleScore {
        rule_id: rule.id.clone(),
        buy_strength,
        sell_strength,
        score,
        direction,
        fired,
        strength,
        confidence,
        classification,
        reasons,
        groups,
    }
}
