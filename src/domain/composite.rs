//! Composite aggregation across strategy families.
//!
//! Each family rule is scored on the same snapshot and the signed scores are
//! blended with [`CompositeWeights`]. A family without a rule (or with an
//! inactive one) contributes the neutral 50. The composite fires only when
//! its classification leans one way and at least one family rule fired that
//! way.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::condition_parser::parse_condition;
use crate::domain::error::{ParseError, SignalbotError};
use crate::domain::indicator::IndicatorKind;
use crate::domain::rule::{ConditionGroup, Rule, SignalType, StrategyFamily};
use crate::domain::scorer::{score_rule, RuleScore, DEFAULT_CORROBORATION_BONUS};
use crate::domain::signal::{cap_reasons, Classification, Direction, NEUTRAL_SCORE};
use crate::domain::snapshot::IndicatorSnapshot;

const WEIGHT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeWeights {
    pub momentum: f64,
    pub trend_following: f64,
    pub mean_reversion: f64,
    pub breakout: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        CompositeWeights {
            momentum: 0.30,
            trend_following: 0.35,
            mean_reversion: 0.15,
            breakout: 0.20,
        }
    }
}

impl CompositeWeights {
    pub fn new(
        momentum: f64,
        trend_following: f64,
        mean_reversion: f64,
        breakout: f64,
    ) -> Result<Self, SignalbotError> {
        let weights = CompositeWeights {
            momentum,
            trend_following,
            mean_reversion,
            breakout,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<(), SignalbotError> {
        let all = [self.momentum, self.trend_following, self.mean_reversion, self.breakout];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SignalbotError::configuration(
                "composite weights must be finite and non-negative",
            ));
        }
        let sum: f64 = all.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(SignalbotError::configuration(format!(
                "composite weights sum to {}, expected 1.0",
                sum
            )));
        }
        Ok(())
    }

    pub fn weight(&self, family: StrategyFamily) -> f64 {
        match family {
            StrategyFamily::Momentum => self.momentum,
            StrategyFamily::TrendFollowing => self.trend_following,
            StrategyFamily::MeanReversion => self.mean_reversion,
            StrategyFamily::Breakout => self.breakout,
            StrategyFamily::Custom => 0.0,
        }
    }

    /// Blended families, heaviest first; declaration order breaks ties.
    pub fn families_by_weight(&self) -> Vec<StrategyFamily> {
        let mut families = StrategyFamily::BLENDED.to_vec();
        families.sort_by(|a, b| {
            self.weight(*b)
                .partial_cmp(&self.weight(*a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        families
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeStrategy {
    pub name: String,
    pub weights: CompositeWeights,
    pub rules: BTreeMap<StrategyFamily, Rule>,
    pub target_pct: f64,
    pub stop_loss_pct: f64,
    pub corroboration_bonus: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyScore {
    pub family: StrategyFamily,
    pub weight: f64,
    /// `None` when the family had no active rule.
    pub rule: Option<RuleScore>,
}

impl FamilyScore {
    pub fn score(&self) -> f64 {
        self.rule.as_ref().map_or(NEUTRAL_SCORE, |r| r.score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeScore {
    pub score: f64,
    pub strength: f64,
    pub direction: Option<Direction>,
    pub fired: bool,
    pub confidence: f64,
    pub classification: Classification,
    pub reasons: Vec<String>,
    pub families: Vec<FamilyScore>,
}

impl CompositeStrategy {
    pub fn new(name: &str, weights: CompositeWeights, rules: Vec<Rule>) -> Self {
        CompositeStrategy {
            name: name.to_string(),
            weights,
            rules: rules.into_iter().map(|r| (r.family, r)).collect(),
            target_pct: 10.0,
            stop_loss_pct: 5.0,
            corroboration_bonus: DEFAULT_CORROBORATION_BONUS,
        }
    }

    /// The built-in family rules with the reference weights.
    pub fn with_defaults() -> Result<Self, SignalbotError> {
        Ok(Self::new("default", CompositeWeights::default(), builtin_rules()?))
    }

    pub fn validate(&self) -> Result<(), SignalbotError> {
        self.weights.validate()?;
        if !(self.target_pct > 0.0) {
            return Err(SignalbotError::configuration(format!(
                "composite '{}': target_pct must be positive",
                self.name
            )));
        }
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct < 100.0) {
            return Err(SignalbotError::configuration(format!(
                "composite '{}': stop_loss_pct must be within (0, 100)",
                self.name
            )));
        }
        if !(0.0..=1.0).contains(&self.corroboration_bonus) {
            return Err(SignalbotError::configuration(format!(
                "composite '{}': corroboration_bonus must be within [0, 1]",
                self.name
            )));
        }
        for (family, rule) in &self.rules {
            if *family == StrategyFamily::Custom {
                return Err(SignalbotError::configuration(format!(
                    "composite '{}': rule '{}' has no blended family",
                    self.name, rule.id
                )));
            }
            rule.validate()?;
        }
        Ok(())
    }

    fn active_rule(&self, family: StrategyFamily) -> Option<&Rule> {
        self.rules.get(&family).filter(|r| r.active)
    }

    pub fn required_indicators(&self) -> BTreeSet<IndicatorKind> {
        StrategyFamily::BLENDED
            .iter()
            .filter_map(|f| self.active_rule(*f))
            .flat_map(|r| r.required_indicators())
            .collect()
    }

    pub fn score(
        &self,
        current: &IndicatorSnapshot,
        previous: Option<&IndicatorSnapshot>,
    ) -> CompositeScore {
        let families: Vec<FamilyScore> = self
            .weights
            .families_by_weight()
            .into_iter()
            .map(|family| FamilyScore {
                family,
                weight: self.weights.weight(family),
                rule: self
                    .active_rule(family)
                    .map(|r| score_rule(r, current, previous, self.corroboration_bonus)),
            })
            .collect();

        let score: f64 = families.iter().map(|f| f.weight * f.score()).sum();
        let classification = Classification::from_score(score);
        let direction = classification.direction();
        let strength = ((score - NEUTRAL_SCORE).abs() * 2.0).min(100.0);

        let agreeing: Vec<(&FamilyScore, &RuleScore)> = families
            .iter()
            .filter_map(|f| f.rule.as_ref().map(|r| (f, r)))
            .filter(|(_, r)| r.fired && direction.is_some() && r.direction == direction)
            .collect();

        let confidence = {
            let total_weight: f64 = agreeing.iter().map(|(f, _)| f.weight).sum();
            if total_weight > 0.0 {
                let mean = agreeing
                    .iter()
                    .map(|(f, r)| f.weight * r.confidence)
                    .sum::<f64>()
                    / total_weight;
                let extra = agreeing.len().saturating_sub(1) as f64 * self.corroboration_bonus;
                (mean + extra).clamp(0.0, 1.0)
            } else {
                0.0
            }
        };

        let reasons = cap_reasons(
            agreeing
                .iter()
                .flat_map(|(_, r)| r.reasons.iter().cloned()),
        );

        CompositeScore {
            score,
            strength,
            direction,
            fired: !agreeing.is_empty(),
            confidence,
            classification,
            reasons,
            families,
        }
    }
}

fn group(
    name: &str,
    signal_type: SignalType,
    conditions: &[&str],
) -> Result<ConditionGroup, ParseError> {
    let parsed = conditions
        .iter()
        .map(|text| parse_condition(text))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ConditionGroup::new(name, signal_type, parsed))
}

fn family_rule(
    id: &str,
    family: StrategyFamily,
    target_pct: f64,
    stop_loss_pct: f64,
    groups: Vec<ConditionGroup>,
) -> Rule {
    let mut rule = Rule::new(id, family, groups);
    rule.name = id.replace('_', " ");
    rule.target_pct = target_pct;
    rule.stop_loss_pct = stop_loss_pct;
    rule
}

/// One rule per blended family.
pub fn builtin_rules() -> Result<Vec<Rule>, SignalbotError> {
    Ok(vec![
        family_rule(
            "momentum",
            StrategyFamily::Momentum,
            10.0,
            5.0,
            vec![
                group(
                    "accelerating",
                    SignalType::Buy,
                    &[
                        "MACD_HIST > 0 weight=2 required label=\"MACD histogram positive\"",
                        "RSI(14) BETWEEN [50, 70] label=\"RSI in bullish zone\"",
                        "RS(20) > 0 label=\"positive 20-day return\"",
                    ],
                )?,
                group(
                    "fading",
                    SignalType::Sell,
                    &[
                        "MACD_HIST < 0 weight=2 required label=\"MACD histogram negative\"",
                        "RSI(14) < 50 label=\"RSI below 50\"",
                        "RS(20) < 0 label=\"negative 20-day return\"",
                    ],
                )?,
            ],
        ),
        family_rule(
            "trend_following",
            StrategyFamily::TrendFollowing,
            15.0,
            7.0,
            vec![
                group(
                    "uptrend",
                    SignalType::Buy,
                    &[
                        "SMA(20) > SMA(60) weight=2 label=\"SMA(20) above SMA(60)\"",
                        "CLOSE > SMA(20) label=\"close above SMA(20)\"",
                        "MACD > MACD_SIGNAL label=\"MACD above signal\"",
                    ],
                )?,
                group(
                    "downtrend",
                    SignalType::Sell,
                    &[
                        "SMA(20) < SMA(60) weight=2 label=\"SMA(20) below SMA(60)\"",
                        "CLOSE < SMA(20) label=\"close below SMA(20)\"",
                        "MACD < MACD_SIGNAL label=\"MACD below signal\"",
                    ],
                )?,
            ],
        ),
        family_rule(
            "mean_reversion",
            StrategyFamily::MeanReversion,
            8.0,
            4.0,
            vec![
                group(
                    "oversold",
                    SignalType::Buy,
                    &[
                        "RSI(14) < 30 weight=2 required label=\"RSI oversold\"",
                        "CLOSE < SMA(20) label=\"close below SMA(20)\"",
                    ],
                )?,
                group(
                    "overbought",
                    SignalType::Sell,
                    &[
                        "RSI(14) > 70 weight=2 required label=\"RSI overbought\"",
                        "CLOSE > SMA(20) label=\"close above SMA(20)\"",
                    ],
                )?,
            ],
        ),
        family_rule(
            "breakout",
            StrategyFamily::Breakout,
            12.0,
            5.0,
            vec![
                group(
                    "volume_breakout",
                    SignalType::Buy,
                    &[
                        "VOLUME_RATIO(20) >= 2 weight=2 required label=\"volume surge\"",
                        "PRICE_CHANGE > 3 weight=2 label=\"price jump over 3%\"",
                        "CLOSE > SMA(20) label=\"close above SMA(20)\"",
                    ],
                )?,
                group(
                    "volume_breakdown",
                    SignalType::Sell,
                    &[
                        "VOLUME_RATIO(20) >= 2 weight=2 required label=\"volume surge\"",
                        "PRICE_CHANGE < -3 weight=2 label=\"price drop over 3%\"",
                        "CLOSE < SMA(20) label=\"close below SMA(20)\"",
                    ],
                )?,
            ],
        ),
    ])
}
