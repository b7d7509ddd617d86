//! Fluent construction of [`EventRule`]s.

use super::{ConditionOperator, EventRule, EventTypeFilter, FieldPath, RuleAction, RuleCondition};
use crate::error::{Error, Result};
use serde_json::Value as JsonValue;

/// Builder for [`EventRule`].
///
/// Field paths are parsed as conditions are added; the first invalid path is
/// reported by [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct RuleBuilder {
    rule: EventRule,
    error: Option<String>,
}

impl RuleBuilder {
    /// Start a rule with its identity and the event types it applies to.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        event_types: impl Into<EventTypeFilter>,
    ) -> Self {
        Self {
            rule: EventRule {
                id: id.into(),
                name: name.into(),
                enabled: true,
                priority: 0,
                event_types: event_types.into(),
                conditions: Vec::new(),
                actions: Vec::new(),
                stop_on_match: false,
            },
            error: None,
        }
    }

    /// Add a condition on a dot path.
    pub fn condition(
        mut self,
        field: &str,
        operator: ConditionOperator,
        value: impl Into<JsonValue>,
    ) -> Self {
        match FieldPath::parse(field) {
            Ok(path) => self
                .rule
                .conditions
                .push(RuleCondition::new(path, operator, value.into())),
            Err(e) => {
                self.error.get_or_insert_with(|| e.to_string());
            }
        }
        self
    }

    /// Add an already constructed condition.
    pub fn when(mut self, condition: RuleCondition) -> Self {
        self.rule.conditions.push(condition);
        self
    }

    /// Append an action.
    pub fn action(mut self, action: RuleAction) -> Self {
        self.rule.actions.push(action);
        self
    }

    /// Set evaluation priority (lower = earlier).
    pub fn priority(mut self, priority: i32) -> Self {
        self.rule.priority = priority;
        self
    }

    /// Stop evaluating later rules once this one matches.
    pub fn stop_on_match(mut self, stop: bool) -> Self {
        self.rule.stop_on_match = stop;
        self
    }

    /// Set enabled state
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.rule.enabled = enabled;
        self
    }

    /// Finish the rule.
    pub fn build(self) -> Result<EventRule> {
        if let Some(reason) = self.error {
            return Err(Error::invalid_rule(self.rule.id, reason));
        }
        self.rule.validate()?;
        Ok(self.rule)
    }
}
