//! # Vigil event processing engine
//!
//! In-process pipeline for domain events (risk changes, timeline updates,
//! connection status, alerts) flowing from producers to handlers.
//!
//! ```text
//! ┌────────────┐ submit ┌──────────────┐ tick ┌─────────────┐      ┌──────────────┐
//! │  Producer  │───────▶│  EventQueue  │─────▶│ RulesEngine │─────▶│   Handlers   │
//! │ (bus, SSE) │        │ (4 tiers)    │      │ (log, ...)  │      │ (by priority)│
//! └────────────┘        └──────────────┘      └─────────────┘      └──────────────┘
//!                              ▲                                           │
//!                              └────────────── retry on failure ◀──────────┘
//! ```
//!
//! - [`EventQueue`]: CRITICAL > HIGH > NORMAL > LOW, FIFO within a tier,
//!   capacity-bounded with eviction that never touches CRITICAL events.
//! - [`RulesEngine`]: declarative condition → action rules with pluggable
//!   [`ActionHandler`]s; the built-in `suppress` action cancels dispatch.
//! - [`EventProcessor`]: batches, evaluates rules, dispatches to
//!   [`EventHandler`]s sequentially, retries failures and keeps statistics.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use vigil_events::{
//!     CallbackHandler, ConditionOperator, Event, EventProcessor, EventType,
//!     HandlerRegistration, ProcessorConfig, RuleAction, RuleBuilder,
//! };
//! use serde_json::json;
//!
//! # async fn run() -> vigil_events::Result<()> {
//! let processor = EventProcessor::new(ProcessorConfig::default())?;
//!
//! processor.add_rule(
//!     RuleBuilder::new("high-risk", "High risk subject", [EventType::RiskChanged])
//!         .condition("payload.score", ConditionOperator::GreaterThanOrEqual, 80)
//!         .action(RuleAction::log_at("warn"))
//!         .build()?,
//! )?;
//!
//! processor.register_handler(
//!     HandlerRegistration::new(
//!         "risk-store",
//!         CallbackHandler::from_fn(|event| {
//!             println!("risk update: {}", event.payload);
//!             Ok(())
//!         }),
//!     )
//!     .for_types([EventType::RiskChanged]),
//! );
//!
//! processor.submit(Event::risk_changed(json!({"subject": "p-17", "score": 91})), None);
//! let results = processor.process_all().await;
//! assert_eq!(results.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod processor;
pub mod queue;
pub mod rules;

pub use config::{EngineConfig, ProcessorConfig};
pub use error::{Error, Result};
pub use events::{Event, EventPriority, EventType};
pub use handlers::{
    CallbackHandler, EventHandler, HandlerInfo, HandlerRegistration, HandlerRegistry,
    DEFAULT_HANDLER_PRIORITY,
};
pub use processor::{
    EventProcessor, ProcessingResult, ProcessorStats, RetryStatus, Subscription,
};
pub use queue::{
    EnqueueOutcome, EventQueue, QueueConfig, QueueStats, QueuedEvent, RequeueOutcome, TierCounts,
};
pub use rules::{
    ActionHandler, ActionInvocation, CallbackActionHandler, ConditionOperator, ConditionOutcome,
    EventRule, EventTypeFilter, FieldPath, LogActionHandler, RuleAction, RuleBuilder,
    RuleCondition, RuleExecutionResult, RulesEngine, SuppressActionHandler, LOG_ACTION,
    SUPPRESS_ACTION,
};
