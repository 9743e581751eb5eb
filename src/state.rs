//! Shared coordinator state.
//!
//! Readers take short `RwLock` read sections and never touch the operation queue, so a slow
//! provider call cannot block them. Multi-field writes happen in one critical section.

use crate::context::EvaluationContext;
use crate::provider::{FeatureProvider, ProviderMetadata};
use crate::status::ProviderStatus;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Current provider, evaluation context and status.
#[derive(Clone, Default)]
pub struct GlobalState {
    pub provider: Option<Arc<dyn FeatureProvider>>,
    pub evaluation_context: Option<EvaluationContext>,
    pub status: ProviderStatus,
}

/// Point-in-time copy handed to readers.
pub type StateSnapshot = GlobalState;

impl GlobalState {
    pub fn provider_metadata(&self) -> Option<ProviderMetadata> {
        self.provider.as_ref().map(|provider| provider.metadata())
    }
}

impl fmt::Debug for GlobalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalState")
            .field("provider", &self.provider_metadata())
            .field("evaluation_context", &self.evaluation_context)
            .field("status", &self.status)
            .finish()
    }
}

#[derive(Default)]
pub struct StateStore {
    state: RwLock<GlobalState>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent snapshot of all fields.
    pub fn read(&self) -> StateSnapshot {
        self.state.read().clone()
    }

    pub fn provider(&self) -> Option<Arc<dyn FeatureProvider>> {
        self.state.read().provider.clone()
    }

    pub fn evaluation_context(&self) -> Option<EvaluationContext> {
        self.state.read().evaluation_context.clone()
    }

    pub fn status(&self) -> ProviderStatus {
        self.state.read().status
    }

    /// Apply `mutator` atomically and return whatever it returns.
    ///
    /// Only operation bodies call this.
    pub(crate) fn write<R>(&self, mutator: impl FnOnce(&mut GlobalState) -> R) -> R {
        let mut state = self.state.write();
        mutator(&mut state)
    }

    pub(crate) fn set_status(&self, status: ProviderStatus) {
        self.write(|state| state.status = status);
    }
}
