//! Processor and engine configuration.
//!
//! Durations are written in milliseconds in config files:
//!
//! ```toml
//! [processor]
//! auto_process = true
//! batch_size = 25
//! retry_delay_ms = 500
//!
//! [[rules]]
//! id = "mute-sync"
//! name = "Mute sync chatter"
//! event_types = ["SYNC_COMPLETED"]
//! actions = [{ type = "suppress" }]
//! ```

use crate::error::{Error, Result};
use crate::queue::QueueConfig;
use crate::rules::EventRule;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Processor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Start the processing loop on construction
    pub auto_process: bool,

    /// Maximum events drained per tick
    pub batch_size: usize,

    /// Requeues allowed for a failing event
    pub max_retries: u32,

    /// Delay before a failed event re-enters the queue
    #[serde(rename = "retry_delay_ms", with = "duration_ms")]
    pub retry_delay: Duration,

    /// Cadence of the processing loop
    #[serde(rename = "tick_interval_ms", with = "duration_ms")]
    pub tick_interval: Duration,

    /// Nominal queue capacity
    pub max_queue_size: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            auto_process: false,
            batch_size: 10,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            tick_interval: Duration::from_millis(100),
            max_queue_size: 1000,
        }
    }
}

impl ProcessorConfig {
    /// Check the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than zero".into()));
        }
        if self.max_queue_size == 0 {
            return Err(Error::Config("max_queue_size must be greater than zero".into()));
        }
        if self.tick_interval.is_zero() {
            return Err(Error::Config("tick_interval must be non-zero".into()));
        }
        Ok(())
    }

    /// Queue limits implied by these settings.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_size: self.max_queue_size,
            max_retries: self.max_retries,
        }
    }
}

/// Full engine definition: processor settings plus the initial rule set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Processor settings
    #[serde(default)]
    pub processor: ProcessorConfig,

    /// Rules installed at construction
    #[serde(default)]
    pub rules: Vec<EventRule>,
}

impl EngineConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` files are read as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    /// Validate processor settings and every rule.
    pub fn validate(&self) -> Result<()> {
        self.processor.validate()?;
        for rule in &self.rules {
            rule.validate()?;
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProcessorConfig::default();
        assert!(!config.auto_process);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert!(config.validate().is_ok());

        let queue = config.queue_config();
        assert_eq!(queue.max_size, 1000);
        assert_eq!(queue.max_retries, 3);
    }

    #[test]
    fn test_validation_failures() {
        let config = ProcessorConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = ProcessorConfig {
            max_queue_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ProcessorConfig {
            tick_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [processor]
            batch_size = 2
            retry_delay_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.processor.batch_size, 2);
        assert_eq!(config.processor.retry_delay, Duration::ZERO);
        assert_eq!(config.processor.tick_interval, Duration::from_millis(100));
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_json_round_trip_of_durations() {
        let json = serde_json::to_value(ProcessorConfig::default()).unwrap();
        assert_eq!(json["retry_delay_ms"], 1000);
        assert_eq!(json["tick_interval_ms"], 100);

        let config = EngineConfig::from_json_str(r#"{"processor": {"max_retries": 0}}"#).unwrap();
        assert_eq!(config.processor.max_retries, 0);
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        assert!(matches!(
            EngineConfig::from_toml_str("processor = 3"),
            Err(Error::Toml(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("[processor]\nbatch_size = 0"),
            Err(Error::Config(_))
        ));
    }
}
