//! Configuration System
//!
//! Coordinator configuration: event bus sizing, subscriber replay, wait timeouts and logging.
//! Values are layered from built-in defaults, an optional global config file, an optional
//! explicit file, and `FLAGSTATE__*` environment variables, in that order.

use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Event bus settings
    #[serde(default)]
    pub events: EventsConfig,

    /// Operation queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Event bus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Events buffered per subscriber before a slow subscriber starts losing the oldest ones
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,

    /// Replay the current status as the first event of every new subscription
    #[serde(default = "default_true")]
    pub replay_status_on_subscribe: bool,
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_true() -> bool {
    true
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
            replay_status_on_subscribe: default_true(),
        }
    }
}

/// Operation queue configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Upper bound on how long `*_and_wait` calls wait (milliseconds). Unset waits forever.
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,
}

impl QueueConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Events(String),
    Queue(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Events(msg) => write!(f, "Events: {}", msg),
            ValidationError::Queue(msg) => write!(f, "Queue: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl CoordinatorConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.events.capacity == 0 {
            errors.push(ValidationError::Events(
                "capacity must be greater than zero".to_string(),
            ));
        }

        if self.queue.wait_timeout_ms == Some(0) {
            errors.push(ValidationError::Queue(
                "wait_timeout_ms must be greater than zero when set".to_string(),
            ));
        }

        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
