//! Provider Coordinator
//!
//! Public entry point. Mutations (`install`, `update_context`, `clear`) go through the serial
//! operation queue; reads go straight to the state store and never wait on provider calls.
//!
//! ```no_run
//! use flagstate::{EvaluationContext, NoOpProvider, ProviderCoordinator, ProviderStatus};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), flagstate::CoordinatorError> {
//! let coordinator = ProviderCoordinator::new()?;
//! let status = coordinator
//!     .install_and_wait(Arc::new(NoOpProvider), Some(EvaluationContext::new("user-1")))
//!     .await?;
//! assert_eq!(status, ProviderStatus::Ready);
//! # Ok(())
//! # }
//! ```

use crate::config::CoordinatorConfig;
use crate::context::EvaluationContext;
use crate::error::CoordinatorError;
use crate::events::{EventBus, EventSubscription, ProviderEvent};
use crate::provider::{FeatureProvider, ProviderMetadata};
use crate::queue::{Coalesce, OperationId, OperationQueue, QueueStats};
use crate::state::{StateSnapshot, StateStore};
use crate::status::{OperationKind, ProviderStatus};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info};

pub mod executor;

pub use executor::LifecycleExecutor;

/// A state-mutating request.
pub enum Operation {
    Install {
        provider: Arc<dyn FeatureProvider>,
        initial_context: Option<EvaluationContext>,
    },
    UpdateContext(EvaluationContext),
    Clear,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Install { .. } => OperationKind::Install,
            Operation::UpdateContext(_) => OperationKind::UpdateContext,
            Operation::Clear => OperationKind::Clear,
        }
    }
}

impl Coalesce for Operation {
    /// Only context updates are superseded; installs and clears always run.
    fn coalescible(&self) -> bool {
        matches!(self, Operation::UpdateContext(_))
    }

    fn label(&self) -> &'static str {
        self.kind().as_str()
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Install {
                provider,
                initial_context,
            } => f
                .debug_struct("Install")
                .field("provider", &provider.metadata())
                .field("initial_context", initial_context)
                .finish(),
            Operation::UpdateContext(context) => {
                f.debug_tuple("UpdateContext").field(context).finish()
            }
            Operation::Clear => f.write_str("Clear"),
        }
    }
}

/// Coordinates the installed provider, the evaluation context and the provider status.
pub struct ProviderCoordinator {
    store: Arc<StateStore>,
    bus: EventBus,
    queue: OperationQueue<LifecycleExecutor>,
    config: CoordinatorConfig,
}

impl ProviderCoordinator {
    /// Create a coordinator with default configuration on the current Tokio runtime.
    pub fn new() -> Result<Self, CoordinatorError> {
        Self::with_config(CoordinatorConfig::default())
    }

    /// Create a coordinator on the current Tokio runtime.
    pub fn with_config(config: CoordinatorConfig) -> Result<Self, CoordinatorError> {
        let runtime = Handle::try_current().map_err(|_| CoordinatorError::RuntimeUnavailable)?;
        Self::with_runtime(config, runtime)
    }

    /// Create a coordinator whose operations run on `runtime`.
    ///
    /// Usable from threads that are not inside a runtime.
    pub fn with_runtime(
        config: CoordinatorConfig,
        runtime: Handle,
    ) -> Result<Self, CoordinatorError> {
        config.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            CoordinatorError::Config(error_msgs.join("; "))
        })?;

        let store = Arc::new(StateStore::new());
        let bus = EventBus::new(config.events.capacity);
        let executor = LifecycleExecutor::new(Arc::clone(&store), bus.clone(), runtime.clone());
        let queue = OperationQueue::new(executor, runtime);

        info!(
            event_capacity = bus.capacity(),
            replay_status = config.events.replay_status_on_subscribe,
            wait_timeout_ms = ?config.queue.wait_timeout_ms,
            "Provider coordinator created"
        );

        Ok(Self {
            store,
            bus,
            queue,
            config,
        })
    }

    /// Install `provider`, replacing any current one. Returns without waiting.
    pub fn install(
        &self,
        provider: Arc<dyn FeatureProvider>,
        initial_context: Option<EvaluationContext>,
    ) -> OperationId {
        self.queue.enqueue_and_forget(Operation::Install {
            provider,
            initial_context,
        })
    }

    /// Install `provider` and wait for its initialization to settle.
    ///
    /// Resolves to the status the install left behind; provider failures show up as
    /// `Error`/`Fatal`, not as `Err`.
    pub async fn install_and_wait(
        &self,
        provider: Arc<dyn FeatureProvider>,
        initial_context: Option<EvaluationContext>,
    ) -> Result<ProviderStatus, CoordinatorError> {
        self.submit_and_wait(Operation::Install {
            provider,
            initial_context,
        })
        .await
    }

    /// Replace the evaluation context. A later update may supersede this one before it runs.
    pub fn update_context(&self, context: EvaluationContext) -> OperationId {
        self.queue.enqueue_and_forget(Operation::UpdateContext(context))
    }

    /// Replace the evaluation context and wait for the provider to reconcile.
    ///
    /// If this update was superseded while pending, resolves once the superseding update
    /// finishes, with its status.
    pub async fn update_context_and_wait(
        &self,
        context: EvaluationContext,
    ) -> Result<ProviderStatus, CoordinatorError> {
        self.submit_and_wait(Operation::UpdateContext(context)).await
    }

    /// Remove the provider. The evaluation context is kept.
    pub fn clear(&self) -> OperationId {
        self.queue.enqueue_and_forget(Operation::Clear)
    }

    pub async fn clear_and_wait(&self) -> Result<ProviderStatus, CoordinatorError> {
        self.submit_and_wait(Operation::Clear).await
    }

    async fn submit_and_wait(
        &self,
        operation: Operation,
    ) -> Result<ProviderStatus, CoordinatorError> {
        let label = operation.label();
        let completion = self.queue.enqueue(operation);
        let id = completion.id();
        let status = completion.wait(self.config.queue.wait_timeout()).await?;
        debug!(
            operation = label,
            operation_id = id.as_u64(),
            status = %status,
            "Operation wait finished"
        );
        Ok(status)
    }

    pub fn provider(&self) -> Option<Arc<dyn FeatureProvider>> {
        self.store.provider()
    }

    pub fn provider_metadata(&self) -> Option<ProviderMetadata> {
        self.store.read().provider_metadata()
    }

    pub fn evaluation_context(&self) -> Option<EvaluationContext> {
        self.store.evaluation_context()
    }

    pub fn status(&self) -> ProviderStatus {
        self.store.status()
    }

    /// Provider, context and status read together.
    pub fn state(&self) -> StateSnapshot {
        self.store.read()
    }

    /// Subscribe to lifecycle events.
    ///
    /// With `events.replay_status_on_subscribe`, the first event describes the current status
    /// (nothing is replayed while `NotReady`).
    pub fn subscribe(&self) -> EventSubscription {
        if self.config.events.replay_status_on_subscribe {
            let store = Arc::clone(&self.store);
            self.bus
                .subscribe_with_initial(move || ProviderEvent::for_status(store.status()))
        } else {
            self.bus.subscribe()
        }
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }
}

impl fmt::Debug for ProviderCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCoordinator")
            .field("state", &self.store.read())
            .field("queue", &self.queue.stats())
            .finish()
    }
}
