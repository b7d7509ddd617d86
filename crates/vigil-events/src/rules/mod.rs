//! Declarative condition → action rules evaluated per event.
//!
//! A rule applies to an event when it is enabled and its [`EventTypeFilter`]
//! accepts the event type. Its conditions are AND-combined; when they all
//! hold, the actions run in declaration order through the engine's
//! [`ActionHandler`] registry.
//!
//! ```rust,ignore
//! let rule = RuleBuilder::new("high-risk", "High risk subject", [EventType::RiskChanged])
//!     .condition("payload.score", ConditionOperator::GreaterThanOrEqual, 80)
//!     .action(RuleAction::log_at("warn"))
//!     .priority(10)
//!     .build()?;
//! engine.register_rule(rule)?;
//! ```

mod actions;
mod builder;
mod condition;
mod engine;

pub use actions::{
    ActionHandler, ActionInvocation, CallbackActionHandler, LogActionHandler, RuleAction,
    SuppressActionHandler, LOG_ACTION, SUPPRESS_ACTION,
};
pub use builder::RuleBuilder;
pub use condition::{ConditionOperator, FieldPath, RuleCondition};
pub use engine::{ConditionOutcome, RuleExecutionResult, RulesEngine};

use crate::error::{Error, Result};
use crate::events::EventType;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;

/// Which event types a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EventTypeFilter {
    /// Every event type (`"*"`)
    #[default]
    Any,
    /// Only the listed types
    Only(HashSet<EventType>),
}

impl EventTypeFilter {
    /// Match every event type.
    pub fn any() -> Self {
        Self::Any
    }

    /// Match the listed types. An empty list matches every type.
    pub fn only(types: impl IntoIterator<Item = EventType>) -> Self {
        let types: HashSet<EventType> = types.into_iter().collect();
        if types.is_empty() {
            Self::Any
        } else {
            Self::Only(types)
        }
    }

    /// Check if `event_type` passes the filter.
    pub fn matches(&self, event_type: &EventType) -> bool {
        match self {
            Self::Any => true,
            Self::Only(types) => types.contains(event_type),
        }
    }
}

impl From<EventType> for EventTypeFilter {
    fn from(event_type: EventType) -> Self {
        Self::only([event_type])
    }
}

impl<const N: usize> From<[EventType; N]> for EventTypeFilter {
    fn from(types: [EventType; N]) -> Self {
        Self::only(types)
    }
}

impl From<Vec<EventType>> for EventTypeFilter {
    fn from(types: Vec<EventType>) -> Self {
        Self::only(types)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FilterRepr {
    Wildcard(String),
    List(Vec<EventType>),
}

impl Serialize for EventTypeFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Any => FilterRepr::Wildcard("*".to_string()).serialize(serializer),
            Self::Only(types) => {
                FilterRepr::List(types.iter().cloned().collect()).serialize(serializer)
            }
        }
    }
}

impl<'de> Deserialize<'de> for EventTypeFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match FilterRepr::deserialize(deserializer)? {
            FilterRepr::Wildcard(s) if s == "*" => Ok(Self::Any),
            FilterRepr::Wildcard(s) => Err(serde::de::Error::custom(format!(
                "expected \"*\" or a list of event types, got \"{s}\""
            ))),
            FilterRepr::List(types) if types.iter().any(|t| t.as_str() == "*") => Ok(Self::Any),
            FilterRepr::List(types) => Ok(Self::only(types)),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// A named, prioritised condition → action mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRule {
    /// Unique id within an engine
    pub id: String,

    /// Human-readable name (used by the `log` action)
    pub name: String,

    /// Disabled rules are skipped entirely
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Evaluation order, lower first
    #[serde(default)]
    pub priority: i32,

    /// Event types this rule applies to
    #[serde(default)]
    pub event_types: EventTypeFilter,

    /// AND-combined conditions; empty means "always"
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,

    /// Executed in order when every condition holds
    #[serde(default)]
    pub actions: Vec<RuleAction>,

    /// Stop evaluating further rules for the event after a match
    #[serde(default)]
    pub stop_on_match: bool,
}

impl EventRule {
    /// Check that the rule can be registered.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::invalid_rule(&self.id, "rule id must not be empty"));
        }
        if let Some(action) = self.actions.iter().find(|a| a.kind.trim().is_empty()) {
            return Err(Error::invalid_rule(
                &self.id,
                format!("action with empty type (params: {})", action.params),
            ));
        }
        Ok(())
    }

    /// Check if the rule is enabled and accepts `event_type`.
    pub fn applies_to(&self, event_type: &EventType) -> bool {
        self.enabled && self.event_types.matches(event_type)
    }

    /// Check if any action is `suppress`.
    pub fn has_suppress(&self) -> bool {
        self.actions.iter().any(RuleAction::is_suppress)
    }
}
