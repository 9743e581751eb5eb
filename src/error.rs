//! Error types for provider lifecycle coordination.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Error codes attached to provider error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ProviderNotReady,
    FlagNotFound,
    ParseError,
    TypeMismatch,
    TargetingKeyMissing,
    InvalidContext,
    General,
    ProviderFatal,
}

/// Errors raised by provider lifecycle calls (`initialize`, `on_context_set`).
///
/// The variant decides the status the coordinator moves to when a call fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Backend is unusable; the coordinator moves to `Fatal`.
    #[error("A fatal error occurred in the provider: {0}")]
    Fatal(String),

    /// Backend failed but may recover; the coordinator moves to `Error`.
    #[error("Provider error: {0}")]
    Recoverable(String),

    #[error("General error: {0}")]
    General(String),
}

impl ProviderError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProviderError::Fatal(_))
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            ProviderError::Fatal(_) => ErrorCode::ProviderFatal,
            ProviderError::Recoverable(_) | ProviderError::General(_) => ErrorCode::General,
        }
    }

    /// Message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            ProviderError::Fatal(message)
            | ProviderError::Recoverable(message)
            | ProviderError::General(message) => message,
        }
    }
}

/// Coordinator-level errors.
///
/// Provider failures never surface here; they become status and events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("No Tokio runtime available to drive the operation queue")]
    RuntimeUnavailable,

    #[error("Operation was dropped before completing")]
    OperationAborted,

    #[error("Timed out after {0:?} waiting for operation to complete")]
    WaitTimeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for CoordinatorError {
    fn from(err: config::ConfigError) -> Self {
        CoordinatorError::Config(err.to_string())
    }
}
