//! Rule definitions stored in an INI file.
//!
//! ```ini
//! [rule.sma_cross]
//! name = SMA cross
//! family = trend_following
//! min_score = 60
//!
//! [group.sma_cross.entry]
//! signal_type = BUY
//! priority = 0
//! condition.1 = SMA(5) CROSS_ABOVE SMA(20) weight=2 required
//! condition.2 = VOLUME > 100000
//! ```
//!
//! Section and key names are case-insensitive, so rule ids load lowercased.

use tracing::{debug, warn};

use crate::domain::condition_parser::parse_condition;
use crate::domain::error::SignalbotError;
use crate::domain::rule::{ConditionGroup, Rule, SignalType, StrategyFamily};
use crate::ports::config_port::ConfigPort;
use crate::ports::rule_store_port::RuleStorePort;

const RULE_PREFIX: &str = "rule.";
const GROUP_PREFIX: &str = "group.";
const CONDITION_PREFIX: &str = "condition.";

const RULE_KEYS: [&str; 6] = [
    "name",
    "family",
    "min_score",
    "target_pct",
    "stop_loss_pct",
    "active",
];
const GROUP_KEYS: [&str; 4] = ["signal_type", "priority", "active", "label"];

/// One `condition.N` line, before parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionEntry {
    pub section: String,
    pub key: String,
    pub index: u32,
    pub raw: String,
}

#[derive(Debug)]
pub struct IniRuleStore {
    rules: Vec<Rule>,
}

impl IniRuleStore {
    /// Parse and validate every rule in `config`.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, SignalbotError> {
        let sections = config.sections();
        let mut rules = Vec::new();

        for section in sections.iter().filter(|s| s.starts_with(RULE_PREFIX)) {
            let id = &section[RULE_PREFIX.len()..];
            if id.is_empty() || id.contains('.') {
                return Err(SignalbotError::invalid(
                    section,
                    "",
                    "rule id must be non-empty and dot-free",
                ));
            }
            warn_unknown_keys(config, section, &RULE_KEYS);

            let family = match config.get_string(section, "family") {
                Some(raw) => raw
                    .parse::<StrategyFamily>()
                    .map_err(|reason| SignalbotError::invalid(section, "family", reason))?,
                None => StrategyFamily::Custom,
            };

            let mut rule = Rule::new(id, family, Vec::new());
            if let Some(name) = config.get_string(section, "name") {
                rule.name = name;
            }
            rule.min_score = read_number(config, section, "min_score", rule.min_score)?;
            rule.target_pct = read_number(config, section, "target_pct", rule.target_pct)?;
            rule.stop_loss_pct = read_number(config, section, "stop_loss_pct", rule.stop_loss_pct)?;
            rule.active = config.get_bool(section, "active", true);
            rule.groups = load_groups(config, &sections, id)?;

            rule.validate()?;
            debug!(rule = %rule.id, groups = rule.groups.len(), "rule loaded");
            rules.push(rule);
        }

        for section in sections.iter().filter(|s| s.starts_with(GROUP_PREFIX)) {
            let owner = group_owner(section).unwrap_or_default();
            if !rules.iter().any(|r| r.id == owner) {
                return Err(SignalbotError::invalid(
                    section,
                    "",
                    format!("group refers to unknown rule '{}'", owner),
                ));
            }
        }

        Ok(IniRuleStore { rules })
    }

    pub fn from_rules(rules: Vec<Rule>) -> Self {
        IniRuleStore { rules }
    }
}

impl RuleStorePort for IniRuleStore {
    fn load_rules(&self) -> Result<Vec<Rule>, SignalbotError> {
        Ok(self.rules.clone())
    }
}

/// Every condition line in the file, grouped by section and sorted by index.
pub fn condition_entries(config: &dyn ConfigPort) -> Result<Vec<ConditionEntry>, SignalbotError> {
    let mut entries = Vec::new();
    for section in config.sections().iter().filter(|s| s.starts_with(GROUP_PREFIX)) {
        entries.extend(section_conditions(config, section)?);
    }
    Ok(entries)
}

fn section_conditions(
    config: &dyn ConfigPort,
    section: &str,
) -> Result<Vec<ConditionEntry>, SignalbotError> {
    let mut entries = Vec::new();
    for key in config.keys(section) {
        let Some(suffix) = key.strip_prefix(CONDITION_PREFIX) else {
            continue;
        };
        let index = suffix.parse::<u32>().map_err(|_| {
            SignalbotError::invalid(section, &key, "condition index must be a number")
        })?;
        let raw = config.get_string(section, &key).unwrap_or_default();
        entries.push(ConditionEntry {
            section: section.to_string(),
            key,
            index,
            raw,
        });
    }
    entries.sort_by_key(|e| e.index);
    Ok(entries)
}

fn group_owner(section: &str) -> Option<&str> {
    section[GROUP_PREFIX.len()..].split_once('.').map(|(rule, _)| rule)
}

fn load_groups(
    config: &dyn ConfigPort,
    sections: &[String],
    rule_id: &str,
) -> Result<Vec<ConditionGroup>, SignalbotError> {
    let prefix = format!("{}{}.", GROUP_PREFIX, rule_id);
    let mut groups = Vec::new();

    for section in sections.iter().filter(|s| s.starts_with(&prefix)) {
        let name = &section[prefix.len()..];
        if name.is_empty() {
            return Err(SignalbotError::invalid(section, "", "group name must not be empty"));
        }
        warn_unknown_keys(config, section, &GROUP_KEYS);

        let signal_type = config
            .get_string(section, "signal_type")
            .ok_or_else(|| SignalbotError::missing(section, "signal_type"))?
            .parse::<SignalType>()
            .map_err(|reason| SignalbotError::invalid(section, "signal_type", reason))?;

        let mut conditions = Vec::new();
        for entry in section_conditions(config, section)? {
            conditions.push(parse_condition(&entry.raw)?);
        }

        let mut group = ConditionGroup::new(name, signal_type, conditions).priority(
            i32::try_from(config.get_int(section, "priority", 0))
                .map_err(|_| SignalbotError::invalid(section, "priority", "out of range"))?,
        );
        group.active = config.get_bool(section, "active", true);
        if let Some(label) = config.get_string(section, "label") {
            group.label = label;
        }
        groups.push(group);
    }
    Ok(groups)
}

fn read_number(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, SignalbotError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(SignalbotError::invalid(section, key, format!("'{}' is not a number", raw))),
        },
    }
}

fn warn_unknown_keys(config: &dyn ConfigPort, section: &str, known: &[&str]) {
    for key in config.keys(section) {
        if !known.contains(&key.as_str()) && !key.starts_with(CONDITION_PREFIX) {
            warn!(%section, %key, "unknown key ignored");
        }
    }
}
