//! Multi-tier priority queue for events awaiting processing.
//!
//! Four FIFO tiers (CRITICAL, HIGH, NORMAL, LOW). Dequeue always takes the
//! oldest event of the most urgent non-empty tier. When the queue is at
//! capacity one event is evicted from the least urgent populated tier among
//! LOW, NORMAL and HIGH; CRITICAL events are never evicted and an incoming
//! CRITICAL event is always admitted, even past `max_size`.

use crate::events::{Event, EventPriority};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Queue limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Nominal capacity across all tiers
    pub max_size: usize,
    /// Requeues allowed before an event is discarded
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            max_retries: 3,
        }
    }
}

/// An event held by the queue.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// Unique, time-ordered id
    pub id: String,
    /// The wrapped event
    pub event: Arc<Event>,
    /// Tier the event lives in
    pub priority: EventPriority,
    /// When the event entered (or last re-entered) the queue
    pub enqueued_at: Instant,
    /// Number of times the event has been requeued
    pub retry_count: u32,
}

impl QueuedEvent {
    fn new(event: Arc<Event>, priority: EventPriority) -> Self {
        Self {
            id: format!("evt_{}", Uuid::now_v7().simple()),
            event,
            priority,
            enqueued_at: Instant::now(),
            retry_count: 0,
        }
    }

    /// Time spent in the queue since the last (re)enqueue.
    pub fn wait_time(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// Result of [`EventQueue::enqueue`].
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// The event was admitted.
    Queued {
        /// Snapshot of the created entry
        queued: QueuedEvent,
        /// Entry evicted to make room, if the queue was full
        evicted: Option<QueuedEvent>,
    },
    /// The queue was full and nothing was evictable; the event is handed back.
    Dropped(Arc<Event>),
}

impl EnqueueOutcome {
    /// Check if the event was admitted.
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }

    /// Id of the admitted event.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Queued { queued, .. } => Some(&queued.id),
            Self::Dropped(_) => None,
        }
    }
}

/// Result of [`EventQueue::requeue`].
#[derive(Debug, Clone)]
pub enum RequeueOutcome {
    /// Reinserted at the front of its tier.
    Requeued {
        /// Retry count after the increment
        retry_count: u32,
    },
    /// Retry budget exceeded; the event was discarded.
    Exhausted(QueuedEvent),
}

impl RequeueOutcome {
    /// Check if the event went back into the queue.
    pub fn is_requeued(&self) -> bool {
        matches!(self, Self::Requeued { .. })
    }
}

/// Current occupancy of each tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    /// CRITICAL tier length
    pub critical: usize,
    /// HIGH tier length
    pub high: usize,
    /// NORMAL tier length
    pub normal: usize,
    /// LOW tier length
    pub low: usize,
}

impl TierCounts {
    /// Length of the given tier.
    pub fn get(&self, priority: EventPriority) -> usize {
        match priority {
            EventPriority::Critical => self.critical,
            EventPriority::High => self.high,
            EventPriority::Normal => self.normal,
            EventPriority::Low => self.low,
        }
    }
}

/// Statistics for the event queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Events admitted by `enqueue`
    pub total_enqueued: u64,
    /// Events handed out by `dequeue`
    pub total_processed: u64,
    /// Events lost to overflow or retry exhaustion
    pub total_dropped: u64,
    /// Successful requeues
    pub total_requeued: u64,
    /// Subset of `total_dropped` caused by retry exhaustion
    pub retries_exhausted: u64,
    /// Current queue size
    pub current_size: usize,
    /// Nominal capacity
    pub capacity: usize,
    /// Per-tier occupancy
    pub by_priority: TierCounts,
}

/// Bounded multi-tier priority queue.
pub struct EventQueue {
    tiers: [VecDeque<QueuedEvent>; 4],
    config: QueueConfig,
    total_enqueued: u64,
    total_processed: u64,
    total_dropped: u64,
    total_requeued: u64,
    retries_exhausted: u64,
}

impl EventQueue {
    /// Create a new queue with the given limits.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            tiers: Default::default(),
            config,
            total_enqueued: 0,
            total_processed: 0,
            total_dropped: 0,
            total_requeued: 0,
            retries_exhausted: 0,
        }
    }

    /// Get the queue limits.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Add an event.
    ///
    /// Without an explicit `priority` the tier comes from
    /// [`EventType::default_priority`](crate::EventType::default_priority).
    pub fn enqueue(
        &mut self,
        event: impl Into<Arc<Event>>,
        priority: Option<EventPriority>,
    ) -> EnqueueOutcome {
        let event = event.into();
        let priority = priority.unwrap_or_else(|| event.event_type.default_priority());

        let mut evicted = None;
        if self.len() >= self.config.max_size {
            match self.evict_one() {
                Some(victim) => {
                    self.total_dropped += 1;
                    warn!(
                        event_id = %victim.id,
                        event_type = %victim.event.event_type,
                        priority = %victim.priority,
                        "Queue full, evicted event"
                    );
                    evicted = Some(victim);
                }
                None if priority == EventPriority::Critical => {
                    warn!(
                        event_type = %event.event_type,
                        size = self.len(),
                        capacity = self.config.max_size,
                        "Queue full of CRITICAL events, admitting CRITICAL event past capacity"
                    );
                }
                None => {
                    self.total_dropped += 1;
                    warn!(
                        event_type = %event.event_type,
                        priority = %priority,
                        "Queue full, dropped incoming event"
                    );
                    return EnqueueOutcome::Dropped(event);
                }
            }
        }

        let queued = QueuedEvent::new(event, priority);
        debug!(
            event_id = %queued.id,
            event_type = %queued.event.event_type,
            priority = %priority,
            "Event enqueued"
        );
        self.tiers[priority.index()].push_back(queued.clone());
        self.total_enqueued += 1;

        EnqueueOutcome::Queued { queued, evicted }
    }

    /// Remove the oldest entry of the least urgent evictable tier.
    fn evict_one(&mut self) -> Option<QueuedEvent> {
        EventPriority::EVICTABLE
            .iter()
            .find_map(|tier| self.tiers[tier.index()].pop_front())
    }

    /// Take the oldest event of the most urgent non-empty tier.
    pub fn dequeue(&mut self) -> Option<QueuedEvent> {
        let next = self.tiers.iter_mut().find_map(|tier| tier.pop_front());
        if next.is_some() {
            self.total_processed += 1;
        }
        next
    }

    /// Same selection as [`dequeue`](Self::dequeue) without removing.
    pub fn peek(&self) -> Option<&QueuedEvent> {
        self.tiers.iter().find_map(|tier| tier.front())
    }

    /// Return an event after a failed attempt.
    ///
    /// The retry count is incremented; within budget the event goes to the
    /// front of its tier with a fresh enqueue time, otherwise it is dropped.
    /// Requeues do not check capacity: the event was already admitted once.
    pub fn requeue(&mut self, mut queued: QueuedEvent) -> RequeueOutcome {
        queued.retry_count += 1;

        if queued.retry_count > self.config.max_retries {
            self.total_dropped += 1;
            self.retries_exhausted += 1;
            warn!(
                event_id = %queued.id,
                event_type = %queued.event.event_type,
                retries = queued.retry_count - 1,
                "Retry budget exhausted, dropping event"
            );
            return RequeueOutcome::Exhausted(queued);
        }

        let retry_count = queued.retry_count;
        debug!(event_id = %queued.id, retry_count, "Event requeued");
        queued.enqueued_at = Instant::now();
        self.tiers[queued.priority.index()].push_front(queued);
        self.total_requeued += 1;

        RequeueOutcome::Requeued { retry_count }
    }

    /// Get the current number of events in the queue.
    pub fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(VecDeque::is_empty)
    }

    /// Discard every queued event, returning how many were removed.
    ///
    /// Cleared events are not counted as dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.len();
        for tier in &mut self.tiers {
            tier.clear();
        }
        if count > 0 {
            debug!(count, "Queue cleared");
        }
        count
    }

    /// Get queue statistics.
    pub fn stats(&self) -> QueueStats {
        let tier_len = |p: EventPriority| self.tiers[p.index()].len();
        QueueStats {
            total_enqueued: self.total_enqueued,
            total_processed: self.total_processed,
            total_dropped: self.total_dropped,
            total_requeued: self.total_requeued,
            retries_exhausted: self.retries_exhausted,
            current_size: self.len(),
            capacity: self.config.max_size,
            by_priority: TierCounts {
                critical: tier_len(EventPriority::Critical),
                high: tier_len(EventPriority::High),
                normal: tier_len(EventPriority::Normal),
                low: tier_len(EventPriority::Low),
            },
        }
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("size", &self.len())
            .field("config", &self.config)
            .finish()
    }
}
