//! Provider Abstraction
//!
//! Lifecycle contract implemented by flag-evaluation backends. The coordinator only drives
//! `initialize` and `on_context_set`; flag resolution itself happens elsewhere, against the
//! provider handle read from the state snapshot.

use crate::context::EvaluationContext;
use crate::error::ProviderError;
use crate::events::ProviderEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Descriptive provider metadata
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub name: Option<String>,
}

impl ProviderMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

/// Flag-evaluation backend lifecycle.
#[async_trait]
pub trait FeatureProvider: Send + Sync {
    fn metadata(&self) -> ProviderMetadata;

    /// Called once when the provider is installed.
    async fn initialize(
        &self,
        initial_context: Option<&EvaluationContext>,
    ) -> Result<(), ProviderError>;

    /// Called whenever the application replaces the evaluation context.
    async fn on_context_set(
        &self,
        old_context: Option<&EvaluationContext>,
        new_context: &EvaluationContext,
    ) -> Result<(), ProviderError>;

    /// Events originating inside the provider (configuration changes, staleness).
    ///
    /// Forwarded onto the coordinator bus for as long as the provider stays installed.
    fn observe(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        None
    }
}

/// A provider whose lifecycle calls always succeed.
#[derive(Debug, Clone, Default)]
pub struct NoOpProvider;

#[async_trait]
impl FeatureProvider for NoOpProvider {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata::named("No-op provider")
    }

    async fn initialize(&self, _: Option<&EvaluationContext>) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn on_context_set(
        &self,
        _: Option<&EvaluationContext>,
        _: &EvaluationContext,
    ) -> Result<(), ProviderError> {
        Ok(())
    }
}
