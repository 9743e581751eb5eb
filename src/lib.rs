//! Flagstate: Provider Lifecycle Coordination
//!
//! Process-wide coordinator for a feature-flag client: installs and replaces the flag
//! evaluation provider, keeps the shared evaluation context, and tracks provider status while
//! serving concurrent readers. Mutations run one at a time through a coalescing operation
//! queue; lifecycle changes are published on an event bus.

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod logging;
pub mod provider;
pub mod queue;
pub mod state;
pub mod status;

pub use config::{ConfigLoader, CoordinatorConfig};
pub use context::{EvaluationContext, EvaluationContextBuilder};
pub use coordinator::{Operation, ProviderCoordinator};
pub use error::{CoordinatorError, ErrorCode, ProviderError};
pub use events::{EventBus, EventEnvelope, EventSubscription, ProviderEvent};
pub use provider::{FeatureProvider, NoOpProvider, ProviderMetadata};
pub use queue::{OperationId, QueueStats};
pub use state::{GlobalState, StateSnapshot};
pub use status::ProviderStatus;
