//! Provider status and the lifecycle transition table.
//!
//! `transition` is pure: operation bodies call it once before awaiting the provider and once
//! after the provider call resolves, then apply the returned status and publish the event.

use crate::error::{ErrorCode, ProviderError};
use crate::events::ProviderEvent;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of the installed provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProviderStatus {
    #[default]
    #[serde(rename = "PROVIDER_NOT_READY")]
    NotReady,
    #[serde(rename = "PROVIDER_READY")]
    Ready,
    #[serde(rename = "PROVIDER_ERROR")]
    Error,
    #[serde(rename = "PROVIDER_FATAL")]
    Fatal,
    #[serde(rename = "PROVIDER_RECONCILING")]
    Reconciling,
    #[serde(rename = "PROVIDER_STALE")]
    Stale,
}

impl ProviderStatus {
    pub const ALL: [ProviderStatus; 6] = [
        ProviderStatus::NotReady,
        ProviderStatus::Ready,
        ProviderStatus::Error,
        ProviderStatus::Fatal,
        ProviderStatus::Reconciling,
        ProviderStatus::Stale,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderStatus::NotReady => "PROVIDER_NOT_READY",
            ProviderStatus::Ready => "PROVIDER_READY",
            ProviderStatus::Error => "PROVIDER_ERROR",
            ProviderStatus::Fatal => "PROVIDER_FATAL",
            ProviderStatus::Reconciling => "PROVIDER_RECONCILING",
            ProviderStatus::Stale => "PROVIDER_STALE",
        }
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation classes that drive status changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Install,
    UpdateContext,
    Clear,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Install => "install",
            OperationKind::UpdateContext => "update_context",
            OperationKind::Clear => "clear",
        }
    }
}

/// Point in an operation body at which a transition is evaluated.
#[derive(Debug, Clone, Copy)]
pub enum Stage<'a> {
    /// Before the provider call is awaited.
    Begin,
    Succeeded,
    Failed(&'a ProviderError),
}

/// Result of a transition: `None` fields leave status untouched / emit nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transition {
    pub status: Option<ProviderStatus>,
    pub event: Option<ProviderEvent>,
}

impl Transition {
    fn none() -> Self {
        Self::default()
    }

    fn to(status: ProviderStatus) -> Self {
        Self {
            status: Some(status),
            event: None,
        }
    }

    fn with_event(status: ProviderStatus, event: ProviderEvent) -> Self {
        Self {
            status: Some(status),
            event: Some(event),
        }
    }
}

/// Map an operation stage to the next status and event.
///
/// `provider_present` is whether a provider was installed when the operation began; it only
/// matters for `UpdateContext`, which leaves status alone when there is nothing to reconcile.
pub fn transition(kind: OperationKind, provider_present: bool, stage: Stage<'_>) -> Transition {
    match (kind, stage) {
        (OperationKind::Install, Stage::Begin) => Transition::to(ProviderStatus::NotReady),
        (OperationKind::Install, Stage::Succeeded) => {
            Transition::with_event(ProviderStatus::Ready, ProviderEvent::Ready)
        }
        (OperationKind::Install, Stage::Failed(err)) => {
            let status = if err.is_fatal() {
                ProviderStatus::Fatal
            } else {
                ProviderStatus::Error
            };
            Transition::with_event(status, ProviderEvent::from_error(err))
        }

        (OperationKind::UpdateContext, _) if !provider_present => Transition::none(),
        (OperationKind::UpdateContext, Stage::Begin) => {
            Transition::with_event(ProviderStatus::Reconciling, ProviderEvent::Reconciling)
        }
        (OperationKind::UpdateContext, Stage::Succeeded) => {
            Transition::with_event(ProviderStatus::Ready, ProviderEvent::ContextChanged)
        }
        // Reconcile failures are never fatal; the code must agree with the `Error` status.
        (OperationKind::UpdateContext, Stage::Failed(err)) => Transition::with_event(
            ProviderStatus::Error,
            ProviderEvent::Error {
                error_code: Some(ErrorCode::General),
                message: Some(err.message().to_string()),
            },
        ),

        (OperationKind::Clear, Stage::Begin) => Transition::to(ProviderStatus::NotReady),
        (OperationKind::Clear, _) => Transition::none(),
    }
}
