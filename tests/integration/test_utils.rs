//! Shared test utilities for integration tests
//!
//! Scriptable providers plus an instrumentation probe shared between providers, so tests can
//! observe call order and overlap across provider replacements.

use async_trait::async_trait;
use flagstate::events::EventSubscription;
use flagstate::{
    CoordinatorConfig, EvaluationContext, FeatureProvider, ProviderCoordinator, ProviderError,
    ProviderEvent, ProviderMetadata,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, Notify};

/// Lifecycle call recorded by a [`MockProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Initialize {
        provider: String,
        context: Option<String>,
    },
    ContextSet {
        provider: String,
        old: Option<String>,
        new: String,
    },
}

/// Records body entry order and concurrent provider calls.
#[derive(Default)]
pub struct Probe {
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// New-context targeting keys passed to `on_context_set`, in call order.
    pub fn reconciled_keys(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::ContextSet { new, .. } => Some(new.clone()),
                Call::Initialize { .. } => None,
            })
            .collect()
    }

    /// Provider names passed through `initialize`, in call order.
    pub fn initialized(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Initialize { provider, .. } => Some(provider.clone()),
                Call::ContextSet { .. } => None,
            })
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self, call: Call) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().push(call);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Provider whose lifecycle calls are scripted by the test.
pub struct MockProvider {
    name: String,
    probe: Arc<Probe>,
    delay: Duration,
    init_error: Option<ProviderError>,
    context_error: Option<ProviderError>,
    panic_on_init: bool,
    /// Metadata lookups answered before `metadata` starts panicking.
    metadata_budget: Option<AtomicUsize>,
    blocked_key: Option<(String, Arc<Notify>)>,
    events: Option<broadcast::Sender<ProviderEvent>>,
}

impl MockProvider {
    pub fn new(name: &str, probe: &Arc<Probe>) -> Self {
        Self {
            name: name.to_string(),
            probe: Arc::clone(probe),
            delay: Duration::ZERO,
            init_error: None,
            context_error: None,
            panic_on_init: false,
            metadata_budget: None,
            blocked_key: None,
            events: None,
        }
    }

    /// Sleep this long inside every lifecycle call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_init(mut self, error: ProviderError) -> Self {
        self.init_error = Some(error);
        self
    }

    pub fn failing_context_set(mut self, error: ProviderError) -> Self {
        self.context_error = Some(error);
        self
    }

    pub fn panicking_init(mut self) -> Self {
        self.panic_on_init = true;
        self
    }

    /// Answer `metadata` `lookups` times, then panic on every later call.
    pub fn panicking_metadata_after(mut self, lookups: usize) -> Self {
        self.metadata_budget = Some(AtomicUsize::new(lookups));
        self
    }

    /// Block `on_context_set` for `targeting_key` until the returned gate is notified.
    pub fn blocking_on(mut self, targeting_key: &str) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.blocked_key = Some((targeting_key.to_string(), Arc::clone(&gate)));
        (self, gate)
    }

    /// Expose a provider-side event stream; returns the sender the test publishes on.
    pub fn with_events(mut self) -> (Self, broadcast::Sender<ProviderEvent>) {
        let (tx, _) = broadcast::channel(16);
        self.events = Some(tx.clone());
        (self, tx)
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl FeatureProvider for MockProvider {
    fn metadata(&self) -> ProviderMetadata {
        if let Some(budget) = &self.metadata_budget {
            if budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_err()
            {
                panic!("{} lost its metadata", self.name);
            }
        }
        ProviderMetadata::named(self.name.clone())
    }

    async fn initialize(
        &self,
        initial_context: Option<&EvaluationContext>,
    ) -> Result<(), ProviderError> {
        self.probe.enter(Call::Initialize {
            provider: self.name.clone(),
            context: initial_context.map(|ctx| ctx.targeting_key().to_string()),
        });
        self.pause().await;
        self.probe.exit();

        if self.panic_on_init {
            panic!("{} failed to initialize", self.name);
        }
        match &self.init_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn on_context_set(
        &self,
        old_context: Option<&EvaluationContext>,
        new_context: &EvaluationContext,
    ) -> Result<(), ProviderError> {
        self.probe.enter(Call::ContextSet {
            provider: self.name.clone(),
            old: old_context.map(|ctx| ctx.targeting_key().to_string()),
            new: new_context.targeting_key().to_string(),
        });
        if let Some((key, gate)) = &self.blocked_key {
            if key == new_context.targeting_key() {
                gate.notified().await;
            }
        }
        self.pause().await;
        self.probe.exit();

        match &self.context_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn observe(&self) -> Option<broadcast::Receiver<ProviderEvent>> {
        self.events.as_ref().map(|tx| tx.subscribe())
    }
}

pub fn coordinator() -> ProviderCoordinator {
    ProviderCoordinator::new().unwrap()
}

pub fn coordinator_with(config: CoordinatorConfig) -> ProviderCoordinator {
    ProviderCoordinator::with_config(config).unwrap()
}

pub fn ctx(key: &str) -> EvaluationContext {
    EvaluationContext::new(key)
}

/// Event types buffered on `subscription`, in delivery order.
pub fn drain_types(subscription: &mut EventSubscription) -> Vec<&'static str> {
    subscription
        .drain()
        .into_iter()
        .map(|envelope| envelope.event.event_type())
        .collect()
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Global mutex to serialize environment variable access across tests
static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Run `f` with each `(key, value)` set in the environment, restoring prior values afterwards.
pub fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let originals: Vec<_> = vars
        .iter()
        .map(|(key, value)| {
            let original = std::env::var(key).ok();
            std::env::set_var(key, value);
            (*key, original)
        })
        .collect();

    let result = f();

    for (key, original) in originals {
        match original {
            Some(value) => std::env::set_var(key, value),
            None => std::env::remove_var(key),
        }
    }
    result
}

/// Run `f` with `XDG_CONFIG_HOME` pointed at `test_dir`, restoring it afterwards.
pub fn with_xdg_env<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let original = std::env::var("XDG_CONFIG_HOME").ok();
    std::env::set_var("XDG_CONFIG_HOME", test_dir.path());

    let result = f();

    match original {
        Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
        None => std::env::remove_var("XDG_CONFIG_HOME"),
    }
    result
}
