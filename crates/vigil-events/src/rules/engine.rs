//! Rule registry and evaluation.

use super::actions::{
    ActionHandler, LogActionHandler, SuppressActionHandler, LOG_ACTION, SUPPRESS_ACTION,
};
use super::EventRule;
use crate::error::{panic_message, Result};
use crate::events::{Event, EventType};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn, Level};

/// Outcome of evaluating one rule's conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionOutcome {
    /// All conditions held
    pub matched: bool,
    /// Index of the first condition that failed
    pub failed_condition: Option<usize>,
}

/// What happened when one rule was evaluated against one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleExecutionResult {
    /// Rule id
    pub rule_id: String,
    /// Rule name
    pub rule_name: String,
    /// Whether every condition held
    pub matched: bool,
    /// Matched and carries a `suppress` action
    pub suppress: bool,
    /// Action types that completed successfully, in order
    pub actions_executed: Vec<String>,
    /// Per-action failures
    pub errors: Vec<String>,
}

impl RuleExecutionResult {
    fn new(rule: &EventRule, matched: bool) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            matched,
            suppress: matched && rule.has_suppress(),
            actions_executed: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Check if any action failed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Rule and action-handler registry.
///
/// All methods take `&self`; registries are snapshotted before any action
/// runs, so registering rules from inside an action handler is allowed and
/// takes effect for the next event.
pub struct RulesEngine {
    rules: RwLock<Vec<Arc<EventRule>>>,
    action_handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl RulesEngine {
    /// Create an engine with the default `log` (INFO) and `suppress` handlers.
    pub fn new() -> Self {
        Self::with_log_level(Level::INFO)
    }

    /// Create an engine whose `log` action defaults to `level`.
    pub fn with_log_level(level: Level) -> Self {
        let engine = Self {
            rules: RwLock::new(Vec::new()),
            action_handlers: RwLock::new(HashMap::new()),
        };
        engine.install_default_handlers(level);
        engine
    }

    fn install_default_handlers(&self, level: Level) {
        self.register_action_handler(LOG_ACTION, LogActionHandler::new(level));
        self.register_action_handler(SUPPRESS_ACTION, SuppressActionHandler);
    }

    /// Register a rule, replacing any rule with the same id in place.
    pub fn register_rule(&self, rule: EventRule) -> Result<()> {
        rule.validate()?;
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => {
                debug!(rule = %rule.id, "Replacing rule");
                *existing = Arc::new(rule);
            }
            None => {
                debug!(rule = %rule.id, priority = rule.priority, "Registered rule");
                rules.push(Arc::new(rule));
            }
        }
        Ok(())
    }

    /// Unregister a rule by id
    pub fn unregister_rule(&self, id: &str) -> bool {
        let mut rules = self.rules.write();
        let before_len = rules.len();
        rules.retain(|r| r.id != id);
        rules.len() < before_len
    }

    /// Enable or disable a rule. Returns `false` if no such rule exists.
    pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|r| r.id == id) {
            Some(rule) => {
                Arc::make_mut(rule).enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Get a rule by id.
    pub fn rule(&self, id: &str) -> Option<EventRule> {
        self.rules
            .read()
            .iter()
            .find(|r| r.id == id)
            .map(|r| EventRule::clone(r))
    }

    /// All rules in evaluation order.
    pub fn rules(&self) -> Vec<EventRule> {
        let mut rules: Vec<EventRule> = self
            .rules
            .read()
            .iter()
            .map(|r| EventRule::clone(r))
            .collect();
        rules.sort_by_key(|r| r.priority);
        rules
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Check if no rules are registered.
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Remove every rule. Action handlers are kept.
    pub fn clear(&self) {
        self.rules.write().clear();
    }

    /// Install or override the handler for an action type.
    pub fn register_action_handler(
        &self,
        action_type: impl Into<String>,
        handler: impl ActionHandler + 'static,
    ) {
        self.register_shared_action_handler(action_type, Arc::new(handler));
    }

    /// Install or override the handler for an action type from a shared handle.
    pub fn register_shared_action_handler(
        &self,
        action_type: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) {
        let action_type = action_type.into();
        debug!(action = %action_type, "Registered action handler");
        self.action_handlers.write().insert(action_type, handler);
    }

    /// Check if a handler exists for an action type.
    pub fn has_action_handler(&self, action_type: &str) -> bool {
        self.action_handlers.read().contains_key(action_type)
    }

    /// Evaluate a rule's conditions (AND semantics).
    pub fn evaluate_conditions(event: &Event, rule: &EventRule) -> ConditionOutcome {
        let failed_condition = rule.conditions.iter().position(|c| !c.evaluate(event));
        ConditionOutcome {
            matched: failed_condition.is_none(),
            failed_condition,
        }
    }

    /// Enabled rules accepting `event_type`, ascending priority, ties in
    /// registration order.
    fn applicable_rules(&self, event_type: &EventType) -> Vec<Arc<EventRule>> {
        let mut applicable: Vec<Arc<EventRule>> = self
            .rules
            .read()
            .iter()
            .filter(|r| r.applies_to(event_type))
            .cloned()
            .collect();
        applicable.sort_by_key(|r| r.priority);
        applicable
    }

    /// Evaluate every applicable rule against `event` and run matching actions.
    ///
    /// Returns one entry per rule evaluated. A matching rule with
    /// `stop_on_match` ends evaluation after its own entry.
    pub async fn evaluate(&self, event: &Event) -> Vec<RuleExecutionResult> {
        let mut results = Vec::new();

        for rule in self.applicable_rules(&event.event_type) {
            let outcome = Self::evaluate_conditions(event, &rule);
            let mut result = RuleExecutionResult::new(&rule, outcome.matched);

            if outcome.matched {
                debug!(rule = %rule.id, event_type = %event.event_type, "Rule matched");
                self.execute_actions(&rule, event, &mut result).await;
            }

            results.push(result);

            if outcome.matched && rule.stop_on_match {
                debug!(rule = %rule.id, "Rule stops further evaluation");
                break;
            }
        }

        results
    }

    async fn execute_actions(
        &self,
        rule: &EventRule,
        event: &Event,
        result: &mut RuleExecutionResult,
    ) {
        for action in &rule.actions {
            let handler = self.action_handlers.read().get(&action.kind).cloned();
            let Some(handler) = handler else {
                warn!(rule = %rule.id, action = %action.kind, "No handler for action");
                result
                    .errors
                    .push(format!("no handler registered for action '{}'", action.kind));
                continue;
            };

            let outcome = AssertUnwindSafe(handler.execute(action, event, rule))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => result.actions_executed.push(action.kind.clone()),
                Ok(Err(e)) => {
                    warn!(rule = %rule.id, action = %action.kind, error = %e, "Rule action failed");
                    result
                        .errors
                        .push(format!("action '{}' failed: {:#}", action.kind, e));
                }
                Err(panic) => {
                    let message = panic_message(panic);
                    warn!(
                        rule = %rule.id,
                        action = %action.kind,
                        panic = %message,
                        "Rule action panicked"
                    );
                    result
                        .errors
                        .push(format!("action '{}' panicked: {}", action.kind, message));
                }
            }
        }
    }
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RulesEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut action_types: Vec<String> = self.action_handlers.read().keys().cloned().collect();
        action_types.sort();
        f.debug_struct("RulesEngine")
            .field("rule_count", &self.len())
            .field("action_types", &action_types)
            .finish()
    }
}
