//! Domain events flowing through the engine.
//!
//! ## Event Types
//!
//! - `RISK_CHANGED` - A subject's risk score or band changed
//! - `PERSON_UPDATED` - Person record fields changed
//! - `CASE_UPDATED` - Case metadata changed
//! - `TIMELINE_UPDATED` - New entries on a case timeline
//! - `ALERT_TRIGGERED` - An alert fired
//! - `THRESHOLD_BREACHED` - A KPI crossed a configured threshold
//! - `CONNECTION_STATUS` - Upstream feed connected/disconnected
//! - `NOTIFICATION` - User-facing notification
//! - `SYNC_COMPLETED` - Background synchronisation finished
//!
//! Producers may submit any other tag; those become [`EventType::Custom`],
//! default to [`EventPriority::Normal`] and only reach match-all handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::fmt;

/// Event type tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A subject's risk assessment changed
    RiskChanged,
    /// A person record was updated
    PersonUpdated,
    /// A case was updated
    CaseUpdated,
    /// A case timeline received new entries
    TimelineUpdated,
    /// An alert fired
    AlertTriggered,
    /// A KPI threshold was crossed
    ThresholdBreached,
    /// Upstream connection status changed
    ConnectionStatus,
    /// A notification for the operator
    Notification,
    /// A background sync finished
    SyncCompleted,
    /// Any tag not known to the engine
    Custom(String),
}

impl EventType {
    /// Parse an event type from its wire name (e.g. `"RISK_CHANGED"`).
    ///
    /// Unknown names are preserved as [`EventType::Custom`].
    pub fn parse(s: &str) -> Self {
        match s {
            "RISK_CHANGED" => Self::RiskChanged,
            "PERSON_UPDATED" => Self::PersonUpdated,
            "CASE_UPDATED" => Self::CaseUpdated,
            "TIMELINE_UPDATED" => Self::TimelineUpdated,
            "ALERT_TRIGGERED" => Self::AlertTriggered,
            "THRESHOLD_BREACHED" => Self::ThresholdBreached,
            "CONNECTION_STATUS" => Self::ConnectionStatus,
            "NOTIFICATION" => Self::Notification,
            "SYNC_COMPLETED" => Self::SyncCompleted,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Get the wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::RiskChanged => "RISK_CHANGED",
            Self::PersonUpdated => "PERSON_UPDATED",
            Self::CaseUpdated => "CASE_UPDATED",
            Self::TimelineUpdated => "TIMELINE_UPDATED",
            Self::AlertTriggered => "ALERT_TRIGGERED",
            Self::ThresholdBreached => "THRESHOLD_BREACHED",
            Self::ConnectionStatus => "CONNECTION_STATUS",
            Self::Notification => "NOTIFICATION",
            Self::SyncCompleted => "SYNC_COMPLETED",
            Self::Custom(name) => name,
        }
    }

    /// Whether this is one of the registered tags.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }

    /// Static priority lookup used when a submission carries no explicit priority.
    pub fn default_priority(&self) -> EventPriority {
        match self {
            Self::AlertTriggered | Self::ThresholdBreached => EventPriority::Critical,
            Self::RiskChanged | Self::ConnectionStatus => EventPriority::High,
            Self::PersonUpdated
            | Self::CaseUpdated
            | Self::TimelineUpdated
            | Self::Notification => EventPriority::Normal,
            Self::SyncCompleted => EventPriority::Low,
            Self::Custom(_) => EventPriority::Normal,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// Queue tier. Declared from most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPriority {
    /// Never evicted on overflow
    Critical,
    /// Evicted only when no LOW or NORMAL event is queued
    High,
    /// Default tier
    Normal,
    /// First to be evicted
    Low,
}

impl EventPriority {
    /// All tiers, most urgent first (dequeue order).
    pub const ALL: [EventPriority; 4] = [Self::Critical, Self::High, Self::Normal, Self::Low];

    /// Tiers eligible for overflow eviction, in eviction preference order.
    pub const EVICTABLE: [EventPriority; 3] = [Self::Low, Self::Normal, Self::High];

    /// Position of this tier in [`EventPriority::ALL`].
    pub fn index(self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }

    /// Get string representation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
        }
    }
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain event submitted by a producer.
///
/// Immutable once created; the engine shares it behind an `Arc` while it is
/// in flight and never hands out mutable access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type tag
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// When the producer created the event
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Structured payload addressed by rule conditions
    #[serde(default)]
    pub payload: JsonValue,
}

impl Event {
    /// Create a new event stamped with the current time.
    pub fn new(event_type: impl Into<EventType>, payload: JsonValue) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Override the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Create a RISK_CHANGED event
    pub fn risk_changed(payload: JsonValue) -> Self {
        Self::new(EventType::RiskChanged, payload)
    }

    /// Create a PERSON_UPDATED event
    pub fn person_updated(payload: JsonValue) -> Self {
        Self::new(EventType::PersonUpdated, payload)
    }

    /// Create a TIMELINE_UPDATED event
    pub fn timeline_updated(payload: JsonValue) -> Self {
        Self::new(EventType::TimelineUpdated, payload)
    }

    /// Create a CONNECTION_STATUS event
    pub fn connection_status(payload: JsonValue) -> Self {
        Self::new(EventType::ConnectionStatus, payload)
    }

    /// Create an ALERT_TRIGGERED event
    pub fn alert_triggered(payload: JsonValue) -> Self {
        Self::new(EventType::AlertTriggered, payload)
    }
}
