//! Rule conditions: a field path, an operator and a literal.

use crate::error::{Error, Result};
use crate::events::Event;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

/// What a [`FieldPath`] is anchored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathRoot {
    Payload,
    Type,
    Timestamp,
}

/// Pre-parsed dot path into an event.
///
/// - `payload.a.b` walks the payload (`payload` alone is the whole payload)
/// - `type` is the event type's wire name
/// - `timestamp` is the event time in milliseconds since the UNIX epoch
/// - anything else is read relative to the payload
///
/// Numeric segments index into arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    root: PathRoot,
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dot path. Empty paths and empty segments are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::InvalidPath(raw.to_string()));
        }

        let (root, segments) = match parts.as_slice() {
            ["type"] => (PathRoot::Type, Vec::new()),
            ["timestamp"] => (PathRoot::Timestamp, Vec::new()),
            ["payload", rest @ ..] => (PathRoot::Payload, rest.to_vec()),
            all => (PathRoot::Payload, all.to_vec()),
        };

        Ok(Self {
            raw: raw.to_string(),
            root,
            segments: segments.into_iter().map(str::to_string).collect(),
        })
    }

    /// The path as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Resolve the path against an event. `None` when any segment is missing.
    pub fn resolve<'a>(&self, event: &'a Event) -> Option<Cow<'a, JsonValue>> {
        match self.root {
            PathRoot::Type => Some(Cow::Owned(JsonValue::String(
                event.event_type.as_str().to_string(),
            ))),
            PathRoot::Timestamp => Some(Cow::Owned(JsonValue::from(
                event.timestamp.timestamp_millis(),
            ))),
            PathRoot::Payload => {
                let mut current = &event.payload;
                for segment in &self.segments {
                    current = match current {
                        JsonValue::Object(map) => map.get(segment)?,
                        JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                        _ => return None,
                    };
                }
                Some(Cow::Borrowed(current))
            }
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Comparison applied by a [`RuleCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
    /// JSON equality (numbers compared numerically)
    Equals,
    /// Negation of `Equals`
    NotEquals,
    /// Substring of a string, or member of an array
    Contains,
    /// `field > value`
    GreaterThan,
    /// `field < value`
    LessThan,
    /// `field >= value`
    GreaterThanOrEqual,
    /// `field <= value`
    LessThanOrEqual,
    /// Field matches the regular expression in `value`
    Matches,
    /// Field is present and not null
    Exists,
    /// Field is absent or null
    NotExists,
}

/// A single predicate over an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Where to read the value from
    pub field: FieldPath,
    /// How to compare it
    pub operator: ConditionOperator,
    /// Literal to compare against (ignored by `exists`/`notExists`)
    #[serde(default)]
    pub value: JsonValue,
}

impl RuleCondition {
    /// Create a new condition.
    pub fn new(field: FieldPath, operator: ConditionOperator, value: JsonValue) -> Self {
        Self {
            field,
            operator,
            value,
        }
    }

    /// Evaluate against an event.
    ///
    /// A missing or null field fails every operator except `notExists`.
    pub fn evaluate(&self, event: &Event) -> bool {
        let resolved = self.field.resolve(event);
        let actual = match resolved.as_deref() {
            Some(v) if !v.is_null() => v,
            _ => return self.operator == ConditionOperator::NotExists,
        };

        match self.operator {
            ConditionOperator::Exists => true,
            ConditionOperator::NotExists => false,
            ConditionOperator::Equals => values_equal(actual, &self.value),
            ConditionOperator::NotEquals => !values_equal(actual, &self.value),
            ConditionOperator::Contains => contains(actual, &self.value),
            ConditionOperator::GreaterThan => {
                compare(actual, &self.value) == Some(Ordering::Greater)
            }
            ConditionOperator::LessThan => compare(actual, &self.value) == Some(Ordering::Less),
            ConditionOperator::GreaterThanOrEqual => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            ConditionOperator::LessThanOrEqual => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            ConditionOperator::Matches => regex_matches(actual, &self.value),
        }
    }
}

fn values_equal(actual: &JsonValue, expected: &JsonValue) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) if actual.is_number() && expected.is_number() => a == b,
        _ => actual == expected,
    }
}

fn contains(haystack: &JsonValue, needle: &JsonValue) -> bool {
    match (haystack, needle) {
        (JsonValue::String(h), JsonValue::String(n)) => h.contains(n.as_str()),
        (JsonValue::Array(items), n) => items.iter().any(|item| values_equal(item, n)),
        _ => false,
    }
}

fn compare(actual: &JsonValue, expected: &JsonValue) -> Option<Ordering> {
    match (actual, expected) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

// Compiled per evaluation. Invalid patterns never match.
fn regex_matches(actual: &JsonValue, pattern: &JsonValue) -> bool {
    let Some(pattern) = pattern.as_str() else {
        return false;
    };
    let text: Cow<'_, str> = match actual {
        JsonValue::String(s) => Cow::Borrowed(s),
        JsonValue::Number(n) => Cow::Owned(n.to_string()),
        JsonValue::Bool(b) => Cow::Owned(b.to_string()),
        _ => return false,
    };

    match Regex::new(pattern) {
        Ok(re) => re.is_match(&text),
        Err(e) => {
            tracing::debug!(
                pattern,
                error = %e,
                "Invalid regex in condition, treating as no match"
            );
            false
        }
    }
}
