//! In-process event bus for provider lifecycle events.
//!
//! Backed by a tokio broadcast channel: every subscriber sees every event published after it
//! subscribed, in publish order.

use crate::events::{EventEnvelope, ProviderEvent};
use futures::Stream;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

/// Default channel capacity (events buffered per lagging subscriber)
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Fan-out bus for [`ProviderEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
    /// Last assigned sequence number. Held across send so seq order matches channel order.
    seq: Arc<Mutex<u64>>,
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    ///
    /// A capacity of zero is bumped to one; broadcast channels cannot be empty.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!(capacity, "Creating provider event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            seq: Arc::new(Mutex::new(0)),
            capacity,
        }
    }

    /// Publish an event to all current subscribers and return its sequence number.
    ///
    /// Publishing with no subscribers is not an error; the event is dropped.
    pub fn publish(&self, event: ProviderEvent) -> u64 {
        let mut seq = self.seq.lock();
        self.send_locked(&mut seq, event)
    }

    /// Run `apply`, then publish the event it returns, all under the publish lock.
    ///
    /// A concurrent [`subscribe_with_initial`](Self::subscribe_with_initial) runs either before
    /// `apply` (and then receives the event live) or after the event is sent (and then only
    /// sees the state `apply` left behind), never in between.
    pub fn apply_and_publish<R, F>(&self, apply: F) -> R
    where
        F: FnOnce() -> (R, Option<ProviderEvent>),
    {
        let mut seq = self.seq.lock();
        let (result, event) = apply();
        if let Some(event) = event {
            self.send_locked(&mut seq, event);
        }
        result
    }

    fn send_locked(&self, seq: &mut u64, event: ProviderEvent) -> u64 {
        *seq += 1;
        let envelope = EventEnvelope::with_now(*seq, event);
        debug!(
            seq = envelope.seq,
            event_type = envelope.event.event_type(),
            subscribers = self.tx.receiver_count(),
            "Publishing provider event"
        );
        let _ = self.tx.send(envelope);
        *seq
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> EventSubscription {
        self.subscribe_with_initial(|| None)
    }

    /// Subscribe, yielding `initial()` first if it returns an event.
    ///
    /// `initial` runs under the publish lock, so no event can slip in between the replayed
    /// value and the live stream.
    pub fn subscribe_with_initial<F>(&self, initial: F) -> EventSubscription
    where
        F: FnOnce() -> Option<ProviderEvent>,
    {
        let seq = self.seq.lock();
        let rx = self.tx.subscribe();
        let initial = initial().map(|event| EventEnvelope::with_now(*seq, event));
        drop(seq);

        debug!(
            replay = initial.is_some(),
            subscribers = self.tx.receiver_count(),
            "New provider event subscriber"
        );
        EventSubscription { initial, rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sequence number of the most recently published event (0 if none).
    pub fn last_seq(&self) -> u64 {
        *self.seq.lock()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// A live subscription. Dropping it (or calling [`unsubscribe`](Self::unsubscribe)) detaches
/// from the bus.
pub struct EventSubscription {
    initial: Option<EventEnvelope>,
    rx: broadcast::Receiver<EventEnvelope>,
}

impl EventSubscription {
    /// Next event, or `None` once the bus is gone.
    ///
    /// If this subscriber fell behind by more than the bus capacity, the overwritten events
    /// are skipped and delivery resumes at the oldest retained one.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        if let Some(envelope) = self.initial.take() {
            return Some(envelope);
        }
        loop {
            match self.rx.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Provider event subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv): `None` when nothing is buffered.
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        if let Some(envelope) = self.initial.take() {
            return Some(envelope);
        }
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => return Some(envelope),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Provider event subscriber lagged, events dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<EventEnvelope> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    pub fn into_stream(self) -> impl Stream<Item = EventEnvelope> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|envelope| (envelope, subscription))
        })
    }

    pub fn unsubscribe(self) {
        debug!("Provider event subscriber detached");
    }
}
