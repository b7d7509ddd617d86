//! Event processor: submission, batched draining, rule evaluation and
//! ordered handler dispatch.
//!
//! ```text
//! submit() ──▶ EventQueue ──(tick)──▶ RulesEngine::evaluate ──▶ handlers (priority order)
//!                  ▲                                                   │
//!                  └──────────────── requeue on failure ◀──────────────┘
//! ```
//!
//! Exactly one tick runs at a time, whether it was started by the automatic
//! loop or by a caller. Within a tick events are processed one after another
//! and, for each event, handlers are awaited one after another. There is no
//! per-handler timeout: a handler that never completes stalls the tick.
//!
//! The tick lock is not reentrant. A handler or action that calls
//! [`EventProcessor::process_tick`] or [`EventProcessor::process_all`] on the
//! processor dispatching it deadlocks; submit events instead.

use crate::config::{EngineConfig, ProcessorConfig};
use crate::error::{panic_message, Error, Result};
use crate::events::{Event, EventPriority, EventType};
use crate::handlers::{HandlerInfo, HandlerRegistration, HandlerRegistry};
use crate::queue::{EnqueueOutcome, EventQueue, QueueStats, QueuedEvent};
use crate::rules::{ActionHandler, EventRule, RuleExecutionResult, RulesEngine};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Retry decision for a processed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetryStatus {
    /// Processing succeeded
    NotNeeded,
    /// The event will re-enter the queue after `delay`
    Scheduled {
        /// Retry number (1-based)
        attempt: u32,
        /// Delay before the requeue
        delay: Duration,
    },
    /// Retry budget spent; the event was discarded
    Exhausted,
}

/// Outcome of processing one event.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    /// Queue id of the event
    pub event_id: String,
    /// Event type
    pub event_type: EventType,
    /// Tier the event was dequeued from
    pub priority: EventPriority,
    /// Handler dispatch was cancelled by a `suppress` action
    pub suppressed: bool,
    /// One entry per rule evaluated
    pub rule_results: Vec<RuleExecutionResult>,
    /// Ids of the handlers invoked, in order
    pub handlers_invoked: Vec<String>,
    /// Rule action and handler failures
    pub errors: Vec<String>,
    /// Wall time spent on the event
    pub duration: Duration,
    /// What happens to the event next
    pub retry: RetryStatus,
}

impl ProcessingResult {
    /// Check if processing completed without errors.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Running processor statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    /// Events processed, including suppressed and failed ones
    pub events_processed: u64,
    /// Events whose processing produced at least one error
    pub events_failed: u64,
    /// Mean processing time over `events_processed`
    pub average_processing_time: Duration,
    /// When the last event finished processing
    pub last_processed_at: Option<DateTime<Utc>>,
    /// Ticks run, including empty ones
    pub ticks: u64,
}

#[derive(Debug, Default)]
struct StatsAccumulator {
    stats: ProcessorStats,
    total_processing_time: Duration,
}

impl StatsAccumulator {
    fn record(&mut self, duration: Duration, failed: bool) {
        self.stats.events_processed += 1;
        if failed {
            self.stats.events_failed += 1;
        }
        self.total_processing_time += duration;
        let mean_nanos =
            self.total_processing_time.as_nanos() / u128::from(self.stats.events_processed);
        self.stats.average_processing_time =
            Duration::from_nanos(u64::try_from(mean_nanos).unwrap_or(u64::MAX));
        self.stats.last_processed_at = Some(Utc::now());
    }
}

struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Scheduler {
    fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

struct ProcessorInner {
    config: ProcessorConfig,
    queue: Mutex<EventQueue>,
    rules: RulesEngine,
    handlers: RwLock<HandlerRegistry>,
    stats: Mutex<StatsAccumulator>,
    tick_lock: tokio::sync::Mutex<()>,
    scheduler: Mutex<Option<Scheduler>>,
    /// Bumped whenever the queue is cleared; delayed retries from an older
    /// generation are discarded.
    generation: AtomicU64,
}

/// Handle returned by [`EventProcessor::register_handler`].
///
/// Dropping it leaves the handler registered.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    processor: Weak<ProcessorInner>,
}

impl Subscription {
    /// Id of the registered handler.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Unregister the handler. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.processor.upgrade() {
            Some(inner) => inner.handlers.write().unregister(&self.id),
            None => false,
        }
    }
}

/// The event processor.
///
/// Cloning is cheap and every clone drives the same queue, rules and
/// handlers.
#[derive(Clone)]
pub struct EventProcessor {
    inner: Arc<ProcessorInner>,
}

impl EventProcessor {
    /// Create a processor. With `auto_process` the loop is started
    /// immediately, which requires a tokio runtime.
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        let processor = Self::build(config)?;
        if processor.inner.config.auto_process {
            processor.start()?;
        }
        Ok(processor)
    }

    /// Create a processor with the rules from `config` installed.
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let processor = Self::build(config.processor)?;
        for rule in config.rules {
            processor.add_rule(rule)?;
        }
        if processor.inner.config.auto_process {
            processor.start()?;
        }
        Ok(processor)
    }

    fn build(config: ProcessorConfig) -> Result<Self> {
        config.validate()?;
        let queue = EventQueue::new(config.queue_config());
        Ok(Self {
            inner: Arc::new(ProcessorInner {
                config,
                queue: Mutex::new(queue),
                rules: RulesEngine::new(),
                handlers: RwLock::new(HandlerRegistry::new()),
                stats: Mutex::new(StatsAccumulator::default()),
                tick_lock: tokio::sync::Mutex::new(()),
                scheduler: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        })
    }

    /// Processor settings.
    pub fn config(&self) -> &ProcessorConfig {
        &self.inner.config
    }

    /// Queue an event. Without `priority` the event type's default tier is
    /// used. Returns the queue id, or `None` if the queue dropped the event.
    pub fn submit(
        &self,
        event: impl Into<Arc<Event>>,
        priority: Option<EventPriority>,
    ) -> Option<String> {
        match self.inner.queue.lock().enqueue(event, priority) {
            EnqueueOutcome::Queued { queued, .. } => Some(queued.id),
            EnqueueOutcome::Dropped(_) => None,
        }
    }

    /// Queue an event in the LOW tier.
    pub fn submit_low_priority(&self, event: impl Into<Arc<Event>>) -> Option<String> {
        self.submit(event, Some(EventPriority::Low))
    }

    /// Queue an event in the CRITICAL tier.
    pub fn submit_critical(&self, event: impl Into<Arc<Event>>) -> Option<String> {
        self.submit(event, Some(EventPriority::Critical))
    }

    /// Register a handler, replacing any handler with the same id.
    pub fn register_handler(&self, registration: HandlerRegistration) -> Subscription {
        let id = registration.id.clone();
        debug!(handler = %id, priority = registration.priority, "Registered handler");
        self.inner.handlers.write().register(registration);
        Subscription {
            id,
            processor: Arc::downgrade(&self.inner),
        }
    }

    /// Unregister a handler by id
    pub fn unregister_handler(&self, id: &str) -> bool {
        self.inner.handlers.write().unregister(id)
    }

    /// Registered handlers in dispatch order.
    pub fn handlers(&self) -> Vec<HandlerInfo> {
        self.inner.handlers.read().list()
    }

    /// Add (or replace) a rule.
    pub fn add_rule(&self, rule: EventRule) -> Result<()> {
        self.inner.rules.register_rule(rule)
    }

    /// Remove a rule by id
    pub fn remove_rule(&self, id: &str) -> bool {
        self.inner.rules.unregister_rule(id)
    }

    /// Enable or disable a rule.
    pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> bool {
        self.inner.rules.set_rule_enabled(id, enabled)
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> Vec<EventRule> {
        self.inner.rules.rules()
    }

    /// Install or override the handler for a rule action type.
    pub fn register_action_handler(
        &self,
        action_type: impl Into<String>,
        handler: impl ActionHandler + 'static,
    ) {
        self.inner.rules.register_action_handler(action_type, handler);
    }

    /// The underlying rules engine.
    pub fn rules_engine(&self) -> &RulesEngine {
        &self.inner.rules
    }

    /// Drain up to `batch_size` events and process them in queue order.
    pub async fn process_tick(&self) -> Vec<ProcessingResult> {
        self.inner.process_tick().await
    }

    /// Run ticks until a tick finds the queue empty.
    ///
    /// Retries scheduled with a non-zero delay are not waited for.
    pub async fn process_all(&self) -> Vec<ProcessingResult> {
        let mut results = Vec::new();
        loop {
            let batch = self.process_tick().await;
            if batch.is_empty() {
                break;
            }
            results.extend(batch);
        }
        results
    }

    /// Start the automatic processing loop. Calling it while the loop is
    /// running has no effect.
    pub fn start(&self) -> Result<()> {
        let mut scheduler = self.inner.scheduler.lock();
        if scheduler.as_ref().is_some_and(Scheduler::is_active) {
            debug!("Processing loop already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = runtime.spawn(run_loop(
            Arc::downgrade(&self.inner),
            self.inner.config.tick_interval,
            shutdown_rx,
        ));
        *scheduler = Some(Scheduler { shutdown_tx, task });

        info!(
            tick_interval_ms = self.inner.config.tick_interval.as_millis() as u64,
            batch_size = self.inner.config.batch_size,
            "Event processor started"
        );
        Ok(())
    }

    /// Stop the automatic loop. A tick already in flight runs to completion.
    pub fn stop(&self) {
        if let Some(scheduler) = self.inner.scheduler.lock().take() {
            let _ = scheduler.shutdown_tx.send(true);
            info!("Event processor stopped");
        }
    }

    /// Check if the automatic loop is running.
    pub fn is_running(&self) -> bool {
        self.inner
            .scheduler
            .lock()
            .as_ref()
            .is_some_and(Scheduler::is_active)
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> ProcessorStats {
        self.inner.stats.lock().stats.clone()
    }

    /// Zero all statistics.
    pub fn reset_stats(&self) {
        *self.inner.stats.lock() = StatsAccumulator::default();
    }

    /// Discard queued events and pending delayed retries. Returns the number
    /// of queued events removed.
    pub fn clear_queue(&self) -> usize {
        self.inner.clear_queue()
    }

    /// Number of queued events.
    pub fn queue_size(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Queue counters.
    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.lock().stats()
    }

    /// Stop the loop and clear the queue, handlers and rules.
    ///
    /// Safe to call more than once. Action handlers stay installed.
    pub fn dispose(&self) {
        self.stop();
        let cleared = self.inner.clear_queue();
        self.inner.handlers.write().clear();
        self.inner.rules.clear();
        info!(cleared, "Event processor disposed");
    }
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("config", &self.inner.config)
            .field("queue_size", &self.queue_size())
            .field("handlers", &self.inner.handlers.read().len())
            .field("rules", &self.inner.rules.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ProcessorInner {
    async fn process_tick(self: &Arc<Self>) -> Vec<ProcessingResult> {
        let _tick = self.tick_lock.lock().await;

        let batch: Vec<QueuedEvent> = {
            let mut queue = self.queue.lock();
            std::iter::from_fn(|| queue.dequeue())
                .take(self.config.batch_size)
                .collect()
        };
        self.stats.lock().stats.ticks += 1;

        if !batch.is_empty() {
            debug!(batch = batch.len(), "Processing batch");
        }

        let mut results = Vec::with_capacity(batch.len());
        for queued in batch {
            results.push(self.process_event(queued).await);
        }
        results
    }

    async fn process_event(self: &Arc<Self>, queued: QueuedEvent) -> ProcessingResult {
        let started = Instant::now();
        let event = Arc::clone(&queued.event);

        let rule_results = self.rules.evaluate(&event).await;
        let suppressed = rule_results.iter().any(|r| r.suppress);
        let mut errors: Vec<String> = rule_results
            .iter()
            .flat_map(|r| r.errors.iter().map(move |e| format!("rule '{}': {}", r.rule_id, e)))
            .collect();

        let mut handlers_invoked = Vec::new();
        if suppressed {
            debug!(
                event_id = %queued.id,
                event_type = %event.event_type,
                "Handler dispatch suppressed"
            );
        } else {
            let handlers = self.handlers.read().matching(&event.event_type);
            for registration in handlers {
                handlers_invoked.push(registration.id.clone());
                let outcome = AssertUnwindSafe(registration.handler.handle(Arc::clone(&event)))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(
                            event_id = %queued.id,
                            handler = %registration.id,
                            error = %e,
                            "Handler failed"
                        );
                        errors.push(format!("handler '{}' failed: {:#}", registration.id, e));
                    }
                    Err(panic) => {
                        let message = panic_message(panic);
                        warn!(
                            event_id = %queued.id,
                            handler = %registration.id,
                            panic = %message,
                            "Handler panicked"
                        );
                        errors.push(format!("handler '{}' panicked: {}", registration.id, message));
                    }
                }
            }
        }

        let duration = started.elapsed();
        let failed = !errors.is_empty();
        self.stats.lock().record(duration, failed);

        let event_id = queued.id.clone();
        let priority = queued.priority;
        let retry = if failed {
            self.schedule_retry(queued)
        } else {
            RetryStatus::NotNeeded
        };

        debug!(
            event_id = %event_id,
            event_type = %event.event_type,
            handlers = handlers_invoked.len(),
            errors = errors.len(),
            duration_us = duration.as_micros() as u64,
            "Event processed"
        );

        ProcessingResult {
            event_id,
            event_type: event.event_type.clone(),
            priority,
            suppressed,
            rule_results,
            handlers_invoked,
            errors,
            duration,
            retry,
        }
    }

    fn schedule_retry(self: &Arc<Self>, queued: QueuedEvent) -> RetryStatus {
        let attempt = queued.retry_count + 1;
        if attempt > self.config.max_retries {
            // Lets the queue account for the exhausted event.
            self.queue.lock().requeue(queued);
            return RetryStatus::Exhausted;
        }

        let delay = self.config.retry_delay;
        let runtime = if delay.is_zero() {
            None
        } else {
            tokio::runtime::Handle::try_current().ok()
        };

        match runtime {
            Some(runtime) => {
                let processor = Arc::downgrade(self);
                let generation = self.generation.load(Ordering::Acquire);
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let Some(inner) = processor.upgrade() else {
                        return;
                    };
                    let mut queue = inner.queue.lock();
                    if inner.generation.load(Ordering::Acquire) == generation {
                        queue.requeue(queued);
                    } else {
                        debug!(event_id = %queued.id, "Queue cleared, dropping pending retry");
                    }
                });
            }
            None => {
                self.queue.lock().requeue(queued);
            }
        }

        RetryStatus::Scheduled { attempt, delay }
    }

    fn clear_queue(&self) -> usize {
        let mut queue = self.queue.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        queue.clear()
    }
}

async fn run_loop(
    processor: Weak<ProcessorInner>,
    tick_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Some(inner) = processor.upgrade() else {
                    break;
                };
                inner.process_tick().await;
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    debug!("Processing loop exited");
}
