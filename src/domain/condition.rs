//! Declarative conditions and their evaluation.
//!
//! A condition compares one indicator against a constant, an inclusive range,
//! or a second indicator. Cross-over operators compare the current snapshot
//! with the one before it.
//!
//! # Evaluation Semantics
//!
//! - `CrossAbove`: previous left <= previous right and current left > current right
//! - `CrossBelow`: mirrored; both return `Unavailable` without a previous snapshot
//! - `Between` is inclusive of both bounds
//! - Any missing value yields `Unavailable`: not passed, no reason text

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::indicator::IndicatorKind;
use crate::domain::snapshot::IndicatorSnapshot;

const EPSILON: f64 = 1e-9;

/// Relative margin at which a strict comparison counts as fully true.
const FULL_STRENGTH_MARGIN: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Between,
    CrossAbove,
    CrossBelow,
}

impl Operator {
    pub fn is_cross(&self) -> bool {
        matches!(self, Operator::CrossAbove | Operator::CrossBelow)
    }

    fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Between => "BETWEEN",
            Operator::CrossAbove => "CROSS_ABOVE",
            Operator::CrossBelow => "CROSS_BELOW",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Comparand {
    Value(f64),
    Range { min: f64, max: f64 },
    Indicator(IndicatorKind),
}

impl fmt::Display for Comparand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparand::Value(v) => write!(f, "{}", v),
            Comparand::Range { min, max } => write!(f, "[{}, {}]", min, max),
            Comparand::Indicator(kind) => write!(f, "{}", kind),
        }
    }
}

/// How a condition chains to the next one in its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Relation {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub indicator: IndicatorKind,
    pub operator: Operator,
    pub comparand: Comparand,
    pub weight: u32,
    pub required: bool,
    pub relation: Relation,
    pub label: Option<String>,
}

impl Condition {
    pub fn new(indicator: IndicatorKind, operator: Operator, comparand: Comparand) -> Self {
        Condition {
            indicator,
            operator,
            comparand,
            weight: 1,
            required: false,
            relation: Relation::And,
            label: None,
        }
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn or(mut self) -> Self {
        self.relation = Relation::Or;
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    /// Indicators this condition reads.
    pub fn indicators(&self) -> Vec<IndicatorKind> {
        match self.comparand {
            Comparand::Indicator(other) => vec![self.indicator, other],
            _ => vec![self.indicator],
        }
    }

    /// Structural check; returns a description of the first problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.weight == 0 {
            return Err(format!("{}: weight must be positive", self));
        }
        for kind in self.indicators() {
            if !kind.is_valid() {
                return Err(format!("{}: invalid indicator window {}", self, kind));
            }
        }
        match (self.operator, self.comparand) {
            (Operator::Between, Comparand::Range { min, max }) => {
                if !(min <= max) {
                    return Err(format!("{}: range minimum exceeds maximum", self));
                }
            }
            (Operator::Between, _) => {
                return Err(format!("{}: BETWEEN needs a [min, max] range", self));
            }
            (_, Comparand::Range { .. }) => {
                return Err(format!("{}: a range is only valid with BETWEEN", self));
            }
            (_, Comparand::Value(v)) if !v.is_finite() => {
                return Err(format!("{}: comparison value must be finite", self));
            }
            _ => {}
        }
        Ok(())
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.indicator, self.operator, self.comparand)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConditionStatus {
    Passed,
    Failed,
    /// A value needed by the condition was missing.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionOutcome {
    pub status: ConditionStatus,
    /// How strongly the condition holds, in [0, 1]; 0 unless passed.
    pub degree: f64,
    pub reason: Option<String>,
}

impl ConditionOutcome {
    pub fn passed(&self) -> bool {
        self.status == ConditionStatus::Passed
    }

    fn unavailable() -> Self {
        ConditionOutcome {
            status: ConditionStatus::Unavailable,
            degree: 0.0,
            reason: None,
        }
    }
}

pub fn evaluate_condition(
    condition: &Condition,
    current: &IndicatorSnapshot,
    previous: Option<&IndicatorSnapshot>,
) -> ConditionOutcome {
    let Some(left) = current.get(condition.indicator) else {
        return ConditionOutcome::unavailable();
    };

    if condition.operator.is_cross() {
        return evaluate_cross(condition, left, current, previous);
    }

    let (passed, degree, detail) = match (condition.operator, condition.comparand) {
        (Operator::Between, Comparand::Range { min, max }) => {
            let passed = left >= min && left <= max;
            let half = (max - min) / 2.0;
            let degree = if !passed {
                0.0
            } else if half <= 0.0 {
                1.0
            } else {
                let nearest = (left - min).min(max - left);
                0.5 + 0.5 * (nearest / half).min(1.0)
            };
            (
                passed,
                degree,
                format!("{} {:.2} in [{}, {}]", condition.indicator, left, min, max),
            )
        }
        (_, Comparand::Range { .. }) | (Operator::Between, _) => {
            return ConditionOutcome::unavailable();
        }
        (op, comparand) => {
            let Some(right) = resolve(comparand, current) else {
                return ConditionOutcome::unavailable();
            };
            let passed = compare(op, left, right);
            let degree = if !passed {
                0.0
            } else if matches!(op, Operator::Eq) {
                1.0
            } else {
                let margin = (left - right).abs() / right.abs().max(EPSILON);
                (0.5 + margin / (2.0 * FULL_STRENGTH_MARGIN)).min(1.0)
            };
            let rhs = match comparand {
                Comparand::Indicator(kind) => format!("{} {:.2}", kind, right),
                other => other.to_string(),
            };
            (
                passed,
                degree,
                format!("{} {:.2} {} {}", condition.indicator, left, op, rhs),
            )
        }
    };

    finish(condition, passed, degree, detail)
}

fn evaluate_cross(
    condition: &Condition,
    left: f64,
    current: &IndicatorSnapshot,
    previous: Option<&IndicatorSnapshot>,
) -> ConditionOutcome {
    let Some(previous) = previous else {
        return ConditionOutcome::unavailable();
    };
    let (Some(right), Some(prev_left), Some(prev_right)) = (
        resolve(condition.comparand, current),
        previous.get(condition.indicator),
        resolve(condition.comparand, previous),
    ) else {
        return ConditionOutcome::unavailable();
    };

    let (passed, verb) = match condition.operator {
        Operator::CrossAbove => (prev_left <= prev_right && left > right, "crossed above"),
        _ => (prev_left >= prev_right && left < right, "crossed below"),
    };

    finish(
        condition,
        passed,
        if passed { 1.0 } else { 0.0 },
        format!("{} {} {}", condition.indicator, verb, condition.comparand),
    )
}

fn finish(condition: &Condition, passed: bool, degree: f64, detail: String) -> ConditionOutcome {
    if passed {
        ConditionOutcome {
            status: ConditionStatus::Passed,
            degree,
            reason: Some(condition.label.clone().unwrap_or(detail)),
        }
    } else {
        ConditionOutcome {
            status: ConditionStatus::Failed,
            degree: 0.0,
            reason: Some(format!("not: {}", detail)),
        }
    }
}

fn resolve(comparand: Comparand, snapshot: &IndicatorSnapshot) -> Option<f64> {
    match comparand {
        Comparand::Value(v) => Some(v),
        Comparand::Indicator(kind) => snapshot.get(kind),
        Comparand::Range { .. } => None,
    }
}

fn compare(op: Operator, left: f64, right: f64) -> bool {
    match op {
        Operator::Eq => (left - right).abs() < EPSILON,
        Operator::Ne => (left - right).abs() >= EPSILON,
        Operator::Gt => left > right,
        Operator::Ge => left >= right,
        Operator::Lt => left < right,
        Operator::Le => left <= right,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn snap(day: u32, values: &[(IndicatorKind, f64)]) -> IndicatorSnapshot {
        IndicatorSnapshot {
            symbol: "TEST".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            values: values.iter().copied().collect(),
        }
    }

    fn rsi_lt(v: f64) -> Condition {
        Condition::new(IndicatorKind::Rsi(14), Operator::Lt, Comparand::Value(v))
    }

    fn golden_cross() -> Condition {
        Condition::new(
            IndicatorKind::Sma(5),
            Operator::CrossAbove,
            Comparand::Indicator(IndicatorKind::Sma(20)),
        )
    }

    #[test]
    fn comparison_against_constant() {
        let s = snap(1, &[(IndicatorKind::Rsi(14), 25.0)]);
        let out = evaluate_condition(&rsi_lt(30.0), &s, None);
        assert!(out.passed());
        assert_eq!(out.reason.as_deref(), Some("RSI(14) 25.00 < 30"));

        let out = evaluate_condition(&rsi_lt(20.0), &s, None);
        assert_eq!(out.status, ConditionStatus::Failed);
        assert_eq!(out.degree, 0.0);
    }

    #[test]
    fn all_comparison_operators() {
        let s = snap(1, &[(IndicatorKind::Close, 100.0)]);
        let check = |op, v| {
            evaluate_condition(
                &Condition::new(IndicatorKind::Close, op, Comparand::Value(v)),
                &s,
                None,
            )
            .passed()
        };
        assert!(check(Operator::Eq, 100.0));
        assert!(!check(Operator::Eq, 100.01));
        assert!(check(Operator::Ne, 99.0));
        assert!(!check(Operator::Ne, 100.0));
        assert!(check(Operator::Gt, 99.0));
        assert!(!check(Operator::Gt, 100.0));
        assert!(check(Operator::Ge, 100.0));
        assert!(check(Operator::Lt, 101.0));
        assert!(check(Operator::Le, 100.0));
        assert!(!check(Operator::Le, 99.0));
    }

    #[test]
    fn between_is_inclusive() {
        let cond = Condition::new(
            IndicatorKind::Rsi(14),
            Operator::Between,
            Comparand::Range { min: 40.0, max: 60.0 },
        );
        for (v, expected) in [
            (40.0, true),
            (60.0, true),
            (50.0, true),
            (39.99, false),
            (60.01, false),
        ] {
            let s = snap(1, &[(IndicatorKind::Rsi(14), v)]);
            assert_eq!(evaluate_condition(&cond, &s, None).passed(), expected, "{}", v);
        }
    }

    #[test]
    fn between_degree_peaks_at_center() {
        let cond = Condition::new(
            IndicatorKind::Rsi(14),
            Operator::Between,
            Comparand::Range { min: 40.0, max: 60.0 },
        );
        let edge = evaluate_condition(&cond, &snap(1, &[(IndicatorKind::Rsi(14), 40.0)]), None);
        let mid = evaluate_condition(&cond, &snap(1, &[(IndicatorKind::Rsi(14), 50.0)]), None);
        assert!((edge.degree - 0.5).abs() < 1e-12);
        assert!((mid.degree - 1.0).abs() < 1e-12);
    }

    #[test]
    fn degree_grows_with_margin() {
        let cond = Condition::new(IndicatorKind::Close, Operator::Gt, Comparand::Value(100.0));
        let near = evaluate_condition(&cond, &snap(1, &[(IndicatorKind::Close, 101.0)]), None);
        let far = evaluate_condition(&cond, &snap(1, &[(IndicatorKind::Close, 120.0)]), None);
        assert!(near.degree > 0.5 && near.degree < 1.0);
        assert_eq!(far.degree, 1.0);
    }

    #[test]
    fn cross_above_without_previous_is_false() {
        let s = snap(2, &[(IndicatorKind::Sma(5), 11.0), (IndicatorKind::Sma(20), 10.0)]);
        let out = evaluate_condition(&golden_cross(), &s, None);
        assert!(!out.passed());
        assert_eq!(out.reason, None);
    }

    #[test]
    fn cross_above_at_transition_only() {
        let prev = snap(1, &[(IndicatorKind::Sma(5), 9.0), (IndicatorKind::Sma(20), 10.0)]);
        let cur = snap(2, &[(IndicatorKind::Sma(5), 11.0), (IndicatorKind::Sma(20), 10.0)]);
        let out = evaluate_condition(&golden_cross(), &cur, Some(&prev));
        assert!(out.passed());
        assert_eq!(out.degree, 1.0);
        assert_eq!(out.reason.as_deref(), Some("SMA(5) crossed above SMA(20)"));

        let next = snap(3, &[(IndicatorKind::Sma(5), 12.0), (IndicatorKind::Sma(20), 10.5)]);
        assert!(!evaluate_condition(&golden_cross(), &next, Some(&cur)).passed());
    }

    #[test]
    fn cross_above_from_touching() {
        let prev = snap(1, &[(IndicatorKind::Sma(5), 10.0), (IndicatorKind::Sma(20), 10.0)]);
        let cur = snap(2, &[(IndicatorKind::Sma(5), 10.5), (IndicatorKind::Sma(20), 10.0)]);
        assert!(evaluate_condition(&golden_cross(), &cur, Some(&prev)).passed());
    }

    #[test]
    fn cross_below_constant() {
        let cond =
            Condition::new(IndicatorKind::Rsi(14), Operator::CrossBelow, Comparand::Value(70.0));
        let prev = snap(1, &[(IndicatorKind::Rsi(14), 72.0)]);
        let cur = snap(2, &[(IndicatorKind::Rsi(14), 68.0)]);
        assert!(evaluate_condition(&cond, &cur, Some(&prev)).passed());
        assert!(!evaluate_condition(&cond, &prev, Some(&cur)).passed());
    }

    #[test]
    fn missing_value_is_unavailable_without_reason() {
        let cond = Condition::new(
            IndicatorKind::Close,
            Operator::Gt,
            Comparand::Indicator(IndicatorKind::Sma(60)),
        );
        let s = snap(1, &[(IndicatorKind::Close, 100.0)]);
        let out = evaluate_condition(&cond, &s, None);
        assert_eq!(out.status, ConditionStatus::Unavailable);
        assert_eq!(out.reason, None);
        assert_eq!(out.degree, 0.0);
    }

    #[test]
    fn missing_previous_value_for_cross_is_unavailable() {
        let prev = snap(1, &[(IndicatorKind::Sma(5), 9.0)]);
        let cur = snap(2, &[(IndicatorKind::Sma(5), 11.0), (IndicatorKind::Sma(20), 10.0)]);
        let out = evaluate_condition(&golden_cross(), &cur, Some(&prev));
        assert_eq!(out.status, ConditionStatus::Unavailable);
    }

    #[test]
    fn label_replaces_generated_reason() {
        let cond = rsi_lt(30.0).label("oversold");
        let s = snap(1, &[(IndicatorKind::Rsi(14), 25.0)]);
        assert_eq!(evaluate_condition(&cond, &s, None).reason.as_deref(), Some("oversold"));
    }

    #[test]
    fn validate_rejects_bad_shapes() {
        assert!(rsi_lt(30.0).weight(0).validate().is_err());
        assert!(
            Condition::new(IndicatorKind::Rsi(14), Operator::Between, Comparand::Value(1.0))
                .validate()
                .is_err()
        );
        assert!(
            Condition::new(
                IndicatorKind::Rsi(14),
                Operator::Gt,
                Comparand::Range { min: 1.0, max: 2.0 }
            )
            .validate()
            .is_err()
        );
        assert!(
            Condition::new(
                IndicatorKind::Rsi(14),
                Operator::Between,
                Comparand::Range { min: 3.0, max: 2.0 }
            )
            .validate()
            .is_err()
        );
        assert!(
            Condition::new(IndicatorKind::Sma(0), Operator::Gt, Comparand::Value(1.0))
                .validate()
                .is_err()
        );
        assert!(golden_cross().validate().is_ok());
    }
}
