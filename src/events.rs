//! Provider lifecycle events: schema, envelopes, and the in-process bus.

use crate::error::{ErrorCode, ProviderError};
use crate::status::ProviderStatus;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub mod bus;

pub use bus::{EventBus, EventSubscription, DEFAULT_EVENT_CAPACITY};

/// Event emitted by the coordinator or forwarded from an installed provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    Ready,
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    ConfigurationChanged,
    Stale,
    Reconciling,
    ContextChanged,
}

impl ProviderEvent {
    pub fn from_error(err: &ProviderError) -> Self {
        ProviderEvent::Error {
            error_code: Some(err.error_code()),
            message: Some(err.message().to_string()),
        }
    }

    /// Synthetic event describing `status`, used to replay state to new subscribers.
    pub fn for_status(status: ProviderStatus) -> Option<Self> {
        match status {
            ProviderStatus::NotReady => None,
            ProviderStatus::Ready => Some(ProviderEvent::Ready),
            ProviderStatus::Error => Some(ProviderEvent::Error {
                error_code: Some(ErrorCode::General),
                message: None,
            }),
            ProviderStatus::Fatal => Some(ProviderEvent::Error {
                error_code: Some(ErrorCode::ProviderFatal),
                message: None,
            }),
            ProviderStatus::Reconciling => Some(ProviderEvent::Reconciling),
            ProviderStatus::Stale => Some(ProviderEvent::Stale),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            ProviderEvent::Ready => "ready",
            ProviderEvent::Error { .. } => "error",
            ProviderEvent::ConfigurationChanged => "configuration_changed",
            ProviderEvent::Stale => "stale",
            ProviderEvent::Reconciling => "reconciling",
            ProviderEvent::ContextChanged => "context_changed",
        }
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            ProviderEvent::Error { error_code, .. } => *error_code,
            _ => None,
        }
    }
}

/// Event plus bus sequence number and emission timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Monotonic per bus; replayed status envelopes carry the last published seq.
    pub seq: u64,
    pub ts: String,
    pub event: ProviderEvent,
}

impl EventEnvelope {
    pub fn with_now(seq: u64, event: ProviderEvent) -> Self {
        Self {
            seq,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        }
    }
}
