//! Error types for the event processing engine.
//!
//! Only construction-time and configuration problems surface as [`Error`].
//! Failures raised by handlers or rule actions while events are processed are
//! captured into [`ProcessingResult`](crate::ProcessingResult) values instead.

use thiserror::Error;

/// Errors that can occur while configuring or driving the engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rule definition was rejected.
    #[error("Invalid rule '{rule}': {reason}")]
    InvalidRule {
        /// Id of the offending rule (may be empty).
        rule: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A condition field path could not be parsed.
    #[error("Invalid field path '{0}'")]
    InvalidPath(String),

    /// The automatic processing loop needs a tokio runtime.
    #[error("No tokio runtime available to drive the processing loop")]
    NoRuntime,

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML configuration could not be parsed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for [`Error::InvalidRule`].
    pub fn invalid_rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule: rule.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Render a caught panic payload for a failure record.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
