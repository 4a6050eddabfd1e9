//! Rule storage port trait.

use crate::domain::error::SignalbotError;
use crate::domain::rule::Rule;

pub trait RuleStorePort: Send + Sync {
    fn load_rules(&self) -> Result<Vec<Rule>, SignalbotError>;

    fn active_rules(&self) -> Result<Vec<Rule>, SignalbotError> {
        Ok(self
            .load_rules()?
            .into_iter()
            .filter(|rule| rule.active)
            .collect())
    }

    fn get_rule(&self, id: &str) -> Result<Option<Rule>, SignalbotError> {
        Ok(self.load_rules()?.into_iter().find(|rule| rule.id == id))
    }
}
