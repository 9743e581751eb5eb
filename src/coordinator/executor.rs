//! Operation bodies for the lifecycle queue.
//!
//! Each body writes its interim state in one critical section, awaits at most one provider
//! call, then applies the closing transition and publishes its event.

use super::Operation;
use crate::context::EvaluationContext;
use crate::error::ProviderError;
use crate::events::{EventBus, ProviderEvent};
use crate::provider::FeatureProvider;
use crate::queue::OperationExecutor;
use crate::state::StateStore;
use crate::status::{transition, OperationKind, ProviderStatus, Stage};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const UNNAMED: &str = "unnamed";

/// Runs install, context-update and clear bodies against the shared store.
pub struct LifecycleExecutor {
    store: Arc<StateStore>,
    bus: EventBus,
    runtime: Handle,
    /// Relay for the installed provider's own events.
    forwarder: Mutex<Option<Forwarder>>,
}

/// A running relay task plus the flag it checks before every publish.
struct Forwarder {
    task: JoinHandle<()>,
    active: Arc<Mutex<bool>>,
}

impl Forwarder {
    /// Once this returns the relay has published its last event.
    fn stop(self) {
        *self.active.lock() = false;
        self.task.abort();
    }
}

impl LifecycleExecutor {
    pub fn new(store: Arc<StateStore>, bus: EventBus, runtime: Handle) -> Self {
        Self {
            store,
            bus,
            runtime,
            forwarder: Mutex::new(None),
        }
    }

    async fn install(
        &self,
        provider: Arc<dyn FeatureProvider>,
        initial_context: Option<EvaluationContext>,
    ) {
        let kind = OperationKind::Install;
        let hooks = guarded_sync(|| (provider_name(provider.as_ref()), provider.observe()));
        let begin = transition(kind, true, Stage::Begin);

        self.bus.apply_and_publish(|| {
            self.store.write(|state| {
                state.provider = Some(Arc::clone(&provider));
                if let Some(context) = &initial_context {
                    state.evaluation_context = Some(context.clone());
                }
                if let Some(status) = begin.status {
                    state.status = status;
                }
            });
            ((), begin.event)
        });

        let started = Instant::now();
        let (name, events) = match hooks {
            Ok(hooks) => hooks,
            Err(err) => {
                self.stop_forwarding();
                self.finish(kind, UNNAMED, Err(err), started);
                return;
            }
        };
        self.start_forwarding(events, &name);

        debug!(provider = %name, "Initializing provider");
        let result = guarded(provider.initialize(initial_context.as_ref())).await;
        self.finish(kind, &name, result, started);
    }

    async fn update_context(&self, context: EvaluationContext) {
        let kind = OperationKind::UpdateContext;
        let (provider, old_context) = self.bus.apply_and_publish(|| {
            self.store.write(|state| {
                let old_context = state.evaluation_context.replace(context.clone());
                let begin = transition(kind, state.provider.is_some(), Stage::Begin);
                if let Some(status) = begin.status {
                    state.status = status;
                }
                ((state.provider.clone(), old_context), begin.event)
            })
        });

        let Some(provider) = provider else {
            debug!(
                targeting_key = ?context.targeting_key(),
                "Stored evaluation context; no provider to reconcile"
            );
            return;
        };

        let started = Instant::now();
        let name = match guarded_sync(|| provider_name(provider.as_ref())) {
            Ok(name) => name,
            Err(err) => {
                self.finish(kind, UNNAMED, Err(err), started);
                return;
            }
        };
        debug!(provider = %name, "Reconciling provider with new evaluation context");
        let result = guarded(provider.on_context_set(old_context.as_ref(), &context)).await;
        self.finish(kind, &name, result, started);
    }

    fn clear(&self) {
        let kind = OperationKind::Clear;
        let previous = self.store.write(|state| {
            let begin = transition(kind, state.provider.is_some(), Stage::Begin);
            if let Some(status) = begin.status {
                state.status = status;
            }
            state.provider.take()
        });
        self.stop_forwarding();

        match previous {
            Some(provider) => info!(
                provider = %guarded_sync(|| provider_name(provider.as_ref()))
                    .unwrap_or_else(|_| UNNAMED.to_string()),
                "Cleared provider"
            ),
            None => debug!("Clear requested with no provider installed"),
        }
    }

    /// Apply the closing transition for a provider call and publish its event.
    fn finish(
        &self,
        kind: OperationKind,
        provider: &str,
        result: Result<(), ProviderError>,
        started: Instant,
    ) {
        let stage = match &result {
            Ok(()) => Stage::Succeeded,
            Err(err) => Stage::Failed(err),
        };
        let end = transition(kind, true, stage);
        let status = self.bus.apply_and_publish(|| {
            let status = self.store.write(|state| {
                if let Some(status) = end.status {
                    state.status = status;
                }
                state.status
            });
            (status, end.event)
        });

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(
                operation = kind.as_str(),
                provider,
                status = %status,
                duration_ms,
                "Provider lifecycle call succeeded"
            ),
            Err(err) if err.is_fatal() => error!(
                operation = kind.as_str(),
                provider,
                status = %status,
                duration_ms,
                error = %err,
                "Provider lifecycle call failed fatally"
            ),
            Err(err) => warn!(
                operation = kind.as_str(),
                provider,
                status = %status,
                duration_ms,
                error = %err,
                "Provider lifecycle call failed"
            ),
        }
    }

    fn start_forwarding(
        &self,
        events: Option<broadcast::Receiver<ProviderEvent>>,
        name: &str,
    ) {
        let mut forwarder = self.forwarder.lock();
        if let Some(previous) = forwarder.take() {
            previous.stop();
        }
        let Some(mut rx) = events else {
            return;
        };

        let bus = self.bus.clone();
        let active = Arc::new(Mutex::new(true));
        let gate = Arc::clone(&active);
        let name = name.to_string();
        debug!(provider = %name, "Forwarding provider events");
        let task = self.runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if !relay(&gate, &bus, &name, event) {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(provider = %name, skipped, "Provider event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        *forwarder = Some(Forwarder { task, active });
    }

    fn stop_forwarding(&self) {
        if let Some(forwarder) = self.forwarder.lock().take() {
            forwarder.stop();
        }
    }
}

impl Drop for LifecycleExecutor {
    fn drop(&mut self) {
        self.stop_forwarding();
    }
}

/// Publish one provider event unless forwarding was stopped. Returns whether it is still on.
fn relay(active: &Mutex<bool>, bus: &EventBus, provider: &str, event: ProviderEvent) -> bool {
    let active = active.lock();
    if !*active {
        return false;
    }
    debug!(
        provider,
        event_type = event.event_type(),
        "Forwarding provider event"
    );
    bus.publish(event);
    true
}

#[async_trait]
impl OperationExecutor for LifecycleExecutor {
    type Operation = Operation;
    type Outcome = ProviderStatus;

    async fn execute(&self, operation: Operation) -> ProviderStatus {
        match operation {
            Operation::Install {
                provider,
                initial_context,
            } => self.install(provider, initial_context).await,
            Operation::UpdateContext(context) => self.update_context(context).await,
            Operation::Clear => self.clear(),
        }
        self.store.status()
    }
}

fn provider_name(provider: &dyn FeatureProvider) -> String {
    provider
        .metadata()
        .name
        .unwrap_or_else(|| UNNAMED.to_string())
}

/// Await a provider call, turning a panic inside it into a provider error.
async fn guarded<F>(call: F) -> Result<(), ProviderError>
where
    F: Future<Output = Result<(), ProviderError>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panicked(payload.as_ref())),
    }
}

/// Synchronous counterpart of [`guarded`] for metadata and event-stream lookups.
fn guarded_sync<T>(call: impl FnOnce() -> T) -> Result<T, ProviderError> {
    std::panic::catch_unwind(AssertUnwindSafe(call)).map_err(|payload| panicked(payload.as_ref()))
}

fn panicked(payload: &(dyn Any + Send)) -> ProviderError {
    ProviderError::General(format!("provider panicked: {}", panic_message(payload)))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
