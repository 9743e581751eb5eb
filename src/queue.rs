//! Operation Queue
//!
//! Serial executor for state-mutating operations. At most one operation body runs at a time;
//! non-coalescible operations run in enqueue order, and a run of consecutive coalescible
//! operations collapses onto its latest member ("last wins"). Every caller attached to an
//! entry, including callers whose operation was superseded, is released with that entry's
//! single outcome.
//!
//! Draining is done by one spawned task per busy period: the first enqueue into an idle queue
//! spawns it, and it exits once the pending list is empty.

use crate::error::CoordinatorError;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Classifies operations for the coalescing policy.
pub trait Coalesce {
    /// Whether a later coalescible operation may supersede this one while it is pending.
    fn coalescible(&self) -> bool;

    /// Short name used in logs.
    fn label(&self) -> &'static str;
}

/// Runs operation bodies. Called from the drain task only, one operation at a time.
#[async_trait]
pub trait OperationExecutor: Send + Sync + 'static {
    type Operation: Coalesce + Send + 'static;
    type Outcome: Clone + Send + 'static;

    async fn execute(&self, operation: Self::Operation) -> Self::Outcome;
}

/// Identifier of a queue entry. Coalesced callers share the id of the entry they joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Entries waiting to run
    pub pending: usize,
    /// Whether a drain task is active
    pub running: bool,
    /// Operations accepted by `enqueue` / `enqueue_and_forget`
    pub submitted: u64,
    /// Operation bodies that ran to completion
    pub executed: u64,
    /// Operations superseded before running
    pub coalesced: u64,
    /// Operation bodies that panicked or were dropped before running
    pub aborted: u64,
}

struct PendingEntry<O, R> {
    id: OperationId,
    operation: O,
    waiters: Vec<oneshot::Sender<R>>,
    enqueued_at: Instant,
}

struct QueueState<O, R> {
    pending: VecDeque<PendingEntry<O, R>>,
    running: bool,
    next_id: u64,
    submitted: u64,
    executed: u64,
    coalesced: u64,
    aborted: u64,
}

impl<O, R> Default for QueueState<O, R> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            running: false,
            next_id: 1,
            submitted: 0,
            executed: 0,
            coalesced: 0,
            aborted: 0,
        }
    }
}

type StateOf<E> =
    QueueState<<E as OperationExecutor>::Operation, <E as OperationExecutor>::Outcome>;

struct QueueShared<E: OperationExecutor> {
    executor: E,
    state: Mutex<StateOf<E>>,
}

/// Serial, coalescing operation queue.
pub struct OperationQueue<E: OperationExecutor> {
    shared: Arc<QueueShared<E>>,
    runtime: Handle,
}

impl<E: OperationExecutor> OperationQueue<E> {
    /// Create a queue whose drain task is spawned on `runtime`.
    pub fn new(executor: E, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                executor,
                state: Mutex::new(QueueState::default()),
            }),
            runtime,
        }
    }

    pub fn executor(&self) -> &E {
        &self.shared.executor
    }

    /// Enqueue an operation and return a handle resolving with its outcome.
    ///
    /// Dropping the handle releases only this caller; the operation still runs.
    pub fn enqueue(&self, operation: E::Operation) -> Completion<E::Outcome> {
        let (tx, rx) = oneshot::channel();
        let id = self.submit(operation, Some(tx));
        Completion { id, rx }
    }

    /// Enqueue an operation without waiting for it.
    pub fn enqueue_and_forget(&self, operation: E::Operation) -> OperationId {
        self.submit(operation, None)
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.state.lock();
        QueueStats {
            pending: state.pending.len(),
            running: state.running,
            submitted: state.submitted,
            executed: state.executed,
            coalesced: state.coalesced,
            aborted: state.aborted,
        }
    }

    fn submit(
        &self,
        operation: E::Operation,
        waiter: Option<oneshot::Sender<E::Outcome>>,
    ) -> OperationId {
        let label = operation.label();
        let mut state = self.shared.state.lock();
        state.submitted += 1;

        // Pending entries have not started, so a coalescible tail can always be replaced.
        let coalescible = operation.coalescible();
        let tail = state
            .pending
            .back_mut()
            .filter(|tail| coalescible && tail.operation.coalescible());

        let id = if let Some(tail) = tail {
            tail.operation = operation;
            tail.waiters.extend(waiter);
            let id = tail.id;
            let waiters = tail.waiters.len();
            state.coalesced += 1;
            debug!(
                operation = label,
                operation_id = id.as_u64(),
                waiters,
                "Coalesced operation into pending entry"
            );
            id
        } else {
            let id = OperationId(state.next_id);
            state.next_id += 1;
            state.pending.push_back(PendingEntry {
                id,
                operation,
                waiters: waiter.into_iter().collect(),
                enqueued_at: Instant::now(),
            });
            debug!(
                operation = label,
                operation_id = id.as_u64(),
                pending = state.pending.len(),
                "Enqueued operation"
            );
            id
        };

        let start_drain = !state.running;
        state.running = true;
        drop(state);

        if start_drain {
            let guard = DrainGuard {
                shared: Arc::clone(&self.shared),
                finished: false,
            };
            self.runtime.spawn(Self::drain(guard));
        }

        id
    }

    async fn drain(mut guard: DrainGuard<E>) {
        let shared = Arc::clone(&guard.shared);
        debug!("Operation queue drain started");

        loop {
            let entry = {
                let mut state = shared.state.lock();
                match state.pending.pop_front() {
                    Some(entry) => entry,
                    None => {
                        state.running = false;
                        guard.finished = true;
                        break;
                    }
                }
            };

            let PendingEntry {
                id,
                operation,
                waiters,
                enqueued_at,
            } = entry;
            let label = operation.label();
            let queued_ms = enqueued_at.elapsed().as_millis();
            let start = Instant::now();

            let result = AssertUnwindSafe(shared.executor.execute(operation))
                .catch_unwind()
                .await;

            match result {
                Ok(outcome) => {
                    shared.state.lock().executed += 1;
                    debug!(
                        operation = label,
                        operation_id = id.as_u64(),
                        waiters = waiters.len(),
                        queued_ms,
                        duration_ms = start.elapsed().as_millis(),
                        "Operation completed"
                    );
                    for tx in waiters {
                        let _ = tx.send(outcome.clone());
                    }
                }
                Err(_) => {
                    shared.state.lock().aborted += 1;
                    error!(
                        operation = label,
                        operation_id = id.as_u64(),
                        waiters = waiters.len(),
                        "Operation panicked; releasing waiters without an outcome"
                    );
                }
            }
        }

        debug!("Operation queue drain finished");
    }
}

/// Resets the queue if a drain task is dropped before it finishes (runtime shutdown).
struct DrainGuard<E: OperationExecutor> {
    shared: Arc<QueueShared<E>>,
    finished: bool,
}

impl<E: OperationExecutor> Drop for DrainGuard<E> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.shared.state.lock();
        let dropped = state.pending.len() as u64;
        state.pending.clear();
        state.aborted += dropped;
        state.running = false;
        warn!(dropped, "Operation queue drain cancelled; pending operations aborted");
    }
}

/// Awaitable completion of an enqueued operation.
#[must_use = "a completion does nothing unless awaited; drop it to detach"]
pub struct Completion<R> {
    id: OperationId,
    rx: oneshot::Receiver<R>,
}

impl<R> Completion<R> {
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Wait with an optional timeout. Timing out releases only this caller.
    pub async fn wait(self, timeout: Option<Duration>) -> Result<R, CoordinatorError> {
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, self)
                .await
                .map_err(|_| CoordinatorError::WaitTimeout(timeout))?,
            None => self.await,
        }
    }
}

impl<R> Future for Completion<R> {
    type Output = Result<R, CoordinatorError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| CoordinatorError::OperationAborted))
    }
}
