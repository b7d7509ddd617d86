//! Rule actions and the handlers that execute them.
//!
//! Two handlers are installed by default on every [`RulesEngine`](super::RulesEngine):
//!
//! - `log`: writes the event type and rule name at a configurable level
//! - `suppress`: does nothing itself; the processor sees it in the matched
//!   rule's action list and skips handler dispatch for the event
//!
//! Anything else is dispatched to a handler registered under the action's
//! `type` via
//! [`RulesEngine::register_action_handler`](super::RulesEngine::register_action_handler).

use super::EventRule;
use crate::events::Event;
use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use tracing::Level;

/// Action type written by [`LogActionHandler`].
pub const LOG_ACTION: &str = "log";

/// Action type that cancels handler dispatch.
pub const SUPPRESS_ACTION: &str = "suppress";

/// One step executed when a rule matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    /// Action type, used to look up the handler
    #[serde(rename = "type")]
    pub kind: String,

    /// Free-form parameters for the handler
    #[serde(default)]
    pub params: JsonValue,
}

impl RuleAction {
    /// Create an action of any type.
    pub fn new(kind: impl Into<String>, params: JsonValue) -> Self {
        Self {
            kind: kind.into(),
            params,
        }
    }

    /// A `log` action at the handler's default level.
    pub fn log() -> Self {
        Self::new(LOG_ACTION, JsonValue::Null)
    }

    /// A `log` action at an explicit level (`"trace"` .. `"error"`).
    pub fn log_at(level: &str) -> Self {
        Self::new(LOG_ACTION, serde_json::json!({ "level": level }))
    }

    /// A `suppress` action.
    pub fn suppress() -> Self {
        Self::new(SUPPRESS_ACTION, JsonValue::Null)
    }

    /// Check if this is a `suppress` action.
    pub fn is_suppress(&self) -> bool {
        self.kind == SUPPRESS_ACTION
    }
}

/// Executes actions of one type.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Run `action` for `event`, which matched `rule`.
    async fn execute(&self, action: &RuleAction, event: &Event, rule: &EventRule)
        -> anyhow::Result<()>;
}

/// Default `log` action handler.
#[derive(Debug, Clone)]
pub struct LogActionHandler {
    level: Level,
}

impl LogActionHandler {
    /// Create a handler that logs at `level` unless the action overrides it.
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// The default level.
    pub fn level(&self) -> Level {
        self.level
    }
}

impl Default for LogActionHandler {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

#[async_trait]
impl ActionHandler for LogActionHandler {
    async fn execute(
        &self,
        action: &RuleAction,
        event: &Event,
        rule: &EventRule,
    ) -> anyhow::Result<()> {
        let level = match action.params.get("level").and_then(JsonValue::as_str) {
            Some(name) => Level::from_str(name).map_err(|_| anyhow!("unknown log level '{name}'"))?,
            None => self.level,
        };

        let event_type = event.event_type.as_str();
        let rule_name = rule.name.as_str();
        match level {
            Level::ERROR => tracing::error!(event_type, rule = rule_name, "Rule matched"),
            Level::WARN => tracing::warn!(event_type, rule = rule_name, "Rule matched"),
            Level::INFO => tracing::info!(event_type, rule = rule_name, "Rule matched"),
            Level::DEBUG => tracing::debug!(event_type, rule = rule_name, "Rule matched"),
            _ => tracing::trace!(event_type, rule = rule_name, "Rule matched"),
        }
        Ok(())
    }
}

/// Default `suppress` action handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuppressActionHandler;

#[async_trait]
impl ActionHandler for SuppressActionHandler {
    async fn execute(
        &self,
        _action: &RuleAction,
        event: &Event,
        rule: &EventRule,
    ) -> anyhow::Result<()> {
        tracing::debug!(
            event_type = %event.event_type,
            rule = %rule.id,
            "Event suppressed by rule"
        );
        Ok(())
    }
}

/// Owned arguments handed to a [`CallbackActionHandler`].
#[derive(Debug, Clone)]
pub struct ActionInvocation {
    /// The action being executed
    pub action: RuleAction,
    /// The matched event
    pub event: Event,
    /// Id of the matched rule
    pub rule_id: String,
    /// Name of the matched rule
    pub rule_name: String,
}

type ActionCallback = Box<
    dyn Fn(ActionInvocation) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

/// Action handler backed by a closure.
///
/// # Example
///
/// ```rust,ignore
/// engine.register_action_handler("notify", CallbackActionHandler::new(|inv| async move {
///     notifier.send(&inv.rule_name, &inv.event).await
/// }));
/// ```
pub struct CallbackActionHandler {
    callback: ActionCallback,
}

impl CallbackActionHandler {
    /// Wrap an async closure.
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(ActionInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            callback: Box::new(move |invocation| Box::pin(callback(invocation))),
        }
    }

    /// Wrap a synchronous closure.
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(ActionInvocation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(move |invocation| std::future::ready(callback(invocation)))
    }
}

#[async_trait]
impl ActionHandler for CallbackActionHandler {
    async fn execute(
        &self,
        action: &RuleAction,
        event: &Event,
        rule: &EventRule,
    ) -> anyhow::Result<()> {
        (self.callback)(ActionInvocation {
            action: action.clone(),
            event: event.clone(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
        })
        .await
    }
}

impl std::fmt::Debug for CallbackActionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackActionHandler").finish_non_exhaustive()
    }
}
