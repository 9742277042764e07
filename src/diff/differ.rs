//! Asynchronous list differ with an ordered update queue.

use super::callback::{ItemDiffer, ListUpdateCallback};
use super::myers::{calculate_diff, DiffResult};
use crate::error::{PagingError, Result};
use crate::runtime::{panic_message, CancellationToken, Completer, Runtime, TaskHandle};
use crate::types::{ListEvent, ListUpdate, UpdateOp};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Differ configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DifferConfig {
    /// Pair removed and inserted items that are the same entity into moves.
    /// Default: true
    pub detect_moves: bool,
}

impl Default for DifferConfig {
    fn default() -> Self {
        Self { detect_moves: true }
    }
}

/// Read access to a list that other components append against.
pub trait ListSnapshot<T>: Send + Sync {
    /// The list as it will be once every queued update has been applied.
    fn snapshot(&self) -> Arc<Vec<T>>;
}

type ErrorListener = Box<dyn FnMut(&PagingError) + Send>;
type ListListener<T> = Box<dyn FnMut(&ListEvent<T>) + Send>;
type DiffOutcome<P> = std::result::Result<Result<DiffResult<P>>, String>;

enum Pending<T> {
    Op {
        op: UpdateOp<T>,
        completer: Completer<u64>,
    },
    Barrier(Completer<u64>),
}

impl<T> Pending<T> {
    fn complete(self, result: Result<u64>) {
        match self {
            Pending::Op { completer, .. } | Pending::Barrier(completer) => completer.complete(result),
        }
    }
}

struct InFlightDiff<T> {
    generation: u64,
    token: CancellationToken,
    op: UpdateOp<T>,
    new_list: Arc<Vec<T>>,
    completer: Completer<u64>,
}

struct DifferState<T> {
    /// Applied list. Only replaced on the owner thread.
    current: Arc<Vec<T>>,
    /// `current` with every queued and in-flight op applied.
    projected: Arc<Vec<T>>,
    version: u64,
    generation: u64,
    queue: VecDeque<Pending<T>>,
    in_flight: Option<InFlightDiff<T>>,
    poisoned: Option<String>,
}

impl<T: Clone> DifferState<T> {
    fn commit(&mut self, op: UpdateOp<T>) -> ListEvent<T> {
        self.version += 1;
        ListEvent {
            version: self.version,
            op,
        }
    }

    /// Queue an op, superseding the latest pending submission if `op`
    /// replaces the list. Superseded completers are returned to the caller.
    fn push(&mut self, op: UpdateOp<T>, completer: Completer<u64>) -> Result<Vec<Completer<u64>>> {
        let mut superseded = Vec::new();
        let mut barriers = Vec::new();

        if op.is_submit_list() {
            let discarded = if let Some(index) = self.queue.iter().rposition(
                |pending| matches!(pending, Pending::Op { op, .. } if op.is_submit_list()),
            ) {
                self.queue.split_off(index)
            } else if let Some(flight) = self.in_flight.take() {
                tracing::debug!(generation = flight.generation, "cancelling superseded diff");
                flight.token.cancel();
                superseded.push(flight.completer);
                std::mem::take(&mut self.queue)
            } else {
                VecDeque::new()
            };

            for pending in discarded {
                match pending {
                    Pending::Op { completer, .. } => superseded.push(completer),
                    Pending::Barrier(completer) => barriers.push(completer),
                }
            }
        }

        op.apply(Arc::make_mut(&mut self.projected))?;
        self.queue.push_back(Pending::Op { op, completer });
        // Barriers wait for whatever replaced the discarded ops.
        self.queue.extend(barriers.into_iter().map(Pending::Barrier));

        if !superseded.is_empty() {
            tracing::debug!(count = superseded.len(), "list submission superseded pending updates");
        }
        Ok(superseded)
    }
}

struct DifferInner<T, D: ItemDiffer<T>> {
    differ: D,
    config: DifferConfig,
    runtime: Runtime,
    state: Mutex<DifferState<T>>,
    callback: Mutex<Box<dyn ListUpdateCallback<D::Payload>>>,
    error_listener: Mutex<Option<ErrorListener>>,
    list_listeners: Mutex<Vec<ListListener<T>>>,
}

/// Owns a list and applies updates to it in submission order.
///
/// `SubmitList` ops are diffed on the worker pool; all other ops are patched
/// directly. At most one diff is in flight. A new `SubmitList` cancels the
/// pending one and discards every op queued after it, since those were
/// computed against a list that will never become current.
///
/// Callbacks and listeners run on the owner thread and must not block on
/// this differ's handles.
pub struct AsyncListDiffer<T, D: ItemDiffer<T>> {
    inner: Arc<DifferInner<T, D>>,
}

impl<T, D: ItemDiffer<T>> Clone for AsyncListDiffer<T, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, D> AsyncListDiffer<T, D>
where
    T: Clone + Send + Sync + 'static,
    D: ItemDiffer<T>,
{
    /// Create a differ over an empty list.
    pub fn new<C>(runtime: Runtime, differ: D, callback: C, config: DifferConfig) -> Self
    where
        C: ListUpdateCallback<D::Payload> + 'static,
    {
        let state = DifferState {
            current: Arc::new(Vec::new()),
            projected: Arc::new(Vec::new()),
            version: 0,
            generation: 0,
            queue: VecDeque::new(),
            in_flight: None,
            poisoned: None,
        };

        Self {
            inner: Arc::new(DifferInner {
                differ,
                config,
                runtime,
                state: Mutex::new(state),
                callback: Mutex::new(Box::new(callback)),
                error_listener: Mutex::new(None),
                list_listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    // --- Updates ---

    /// Queue an update and return immediately.
    ///
    /// Rejections are delivered to the error listener, never returned.
    pub fn update_list(&self, op: UpdateOp<T>) {
        let _ = self.submit(op);
    }

    /// Queue an update; the handle resolves with the list version at which
    /// it was applied.
    ///
    /// Cancelling the handle only abandons the wait: once queued, the op is
    /// part of the ordered history.
    pub fn submit(&self, op: UpdateOp<T>) -> TaskHandle<u64> {
        let (completer, handle) = self.inner.runtime.task();

        let mut state = self.inner.state.lock();
        let rejected = match &state.poisoned {
            Some(reason) => Some(PagingError::Poisoned(reason.clone())),
            None => op.validate(state.projected.len()).err(),
        };
        if let Some(error) = rejected {
            drop(state);
            self.inner.reject(error, completer);
            return handle;
        }

        match state.push(op, completer) {
            Ok(superseded) => {
                drop(state);
                for completer in superseded {
                    completer.complete(Err(PagingError::Superseded));
                }
                self.inner.schedule_drain();
            }
            Err(error) => {
                // validate() already accepted the op
                tracing::error!(%error, "projected list rejected a validated op");
            }
        }

        handle
    }

    /// Queue an update built against the pending list, atomically.
    ///
    /// Unlike [`submit`](Self::submit), rejection is returned synchronously
    /// and the error listener is not involved.
    pub(crate) fn try_submit_with<F>(&self, build: F) -> Result<TaskHandle<u64>>
    where
        F: FnOnce(&[T]) -> UpdateOp<T>,
    {
        let mut state = self.inner.state.lock();
        if let Some(reason) = &state.poisoned {
            return Err(PagingError::Poisoned(reason.clone()));
        }

        let op = build(&state.projected);
        op.validate(state.projected.len())?;

        let (completer, handle) = self.inner.runtime.task();
        let superseded = state.push(op, completer)?;
        drop(state);

        for completer in superseded {
            completer.complete(Err(PagingError::Superseded));
        }
        self.inner.schedule_drain();
        Ok(handle)
    }

    /// Queue an update and block until it (and everything before it) has
    /// been applied.
    pub fn await_update_list(&self, op: UpdateOp<T>) -> Result<u64> {
        self.submit(op).wait()
    }

    /// Resolve once every update queued so far has been applied or
    /// discarded. Resolves with the list version at that point.
    pub fn flush(&self) -> TaskHandle<u64> {
        let (completer, handle) = self.inner.runtime.task();

        let mut state = self.inner.state.lock();
        if let Some(reason) = &state.poisoned {
            completer.complete(Err(PagingError::Poisoned(reason.clone())));
            return handle;
        }
        state.queue.push_back(Pending::Barrier(completer));
        drop(state);

        self.inner.schedule_drain();
        handle
    }

    // --- Accessors ---

    /// The applied list.
    pub fn current_list(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.inner.state.lock().current)
    }

    /// The list once every queued update has been applied.
    pub fn pending_list(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.inner.state.lock().projected)
    }

    /// Number of updates applied so far.
    pub fn version(&self) -> u64 {
        self.inner.state.lock().version
    }

    pub fn is_poisoned(&self) -> bool {
        self.inner.state.lock().poisoned.is_some()
    }

    // --- Listeners ---

    /// Receive rejected and failed updates (on the owner thread).
    pub fn set_error_listener<F>(&self, listener: F)
    where
        F: FnMut(&PagingError) + Send + 'static,
    {
        *self.inner.error_listener.lock() = Some(Box::new(listener));
    }

    /// Receive every applied update (on the owner thread), after the
    /// positional callback has seen it.
    pub fn add_list_listener<F>(&self, listener: F)
    where
        F: FnMut(&ListEvent<T>) + Send + 'static,
    {
        self.inner.list_listeners.lock().push(Box::new(listener));
    }
}

impl<T, D> ListSnapshot<T> for AsyncListDiffer<T, D>
where
    T: Clone + Send + Sync + 'static,
    D: ItemDiffer<T>,
{
    fn snapshot(&self) -> Arc<Vec<T>> {
        self.pending_list()
    }
}

impl<T, D> DifferInner<T, D>
where
    T: Clone + Send + Sync + 'static,
    D: ItemDiffer<T>,
{
    fn schedule_drain(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        self.runtime.owner().post(move || inner.drain());
    }

    fn reject(self: &Arc<Self>, error: PagingError, completer: Completer<u64>) {
        tracing::warn!(%error, "list update rejected");
        let inner = Arc::clone(self);
        self.runtime.owner().post(move || {
            inner.notify_error(&error);
            completer.complete(Err(error));
        });
    }

    fn notify_error(&self, error: &PagingError) {
        if let Some(listener) = self.error_listener.lock().as_mut() {
            listener(error);
        }
    }

    /// Apply queued ops until the queue is empty or a diff is started.
    /// Runs on the owner thread.
    fn drain(self: &Arc<Self>) {
        loop {
            let mut state = self.state.lock();
            if state.in_flight.is_some() {
                return;
            }
            let Some(pending) = state.queue.pop_front() else {
                return;
            };

            let (op, completer) = match pending {
                Pending::Barrier(completer) => {
                    completer.complete(Ok(state.version));
                    continue;
                }
                Pending::Op { op, completer } => (op, completer),
            };

            if let UpdateOp::SubmitList(items) = &op {
                if !state.current.is_empty() && !items.is_empty() {
                    self.start_diff(state, op, completer);
                    return;
                }
            }

            // `change_payload` runs here, on the owner thread.
            let patched = panic::catch_unwind(AssertUnwindSafe(|| {
                self.patch(Arc::make_mut(&mut state.current), &op)
            }));
            let updates = match patched {
                Ok(Ok(updates)) => updates,
                Ok(Err(error)) => {
                    drop(state);
                    tracing::warn!(%error, "list update failed to apply");
                    self.notify_error(&error);
                    completer.complete(Err(error));
                    continue;
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    self.poison(state, PagingError::DiffPanicked(message), completer);
                    return;
                }
            };
            let event = state.commit(op);
            drop(state);

            self.publish(&updates, event, completer);
        }
    }

    /// Positional updates for a directly applied op, then apply it.
    fn patch(&self, list: &mut Vec<T>, op: &UpdateOp<T>) -> Result<Vec<ListUpdate<D::Payload>>> {
        op.validate(list.len())?;

        let updates = match op {
            UpdateOp::SubmitList(items) => {
                let mut updates = Vec::new();
                if !list.is_empty() {
                    updates.push(ListUpdate::Removed {
                        position: 0,
                        count: list.len(),
                    });
                }
                if !items.is_empty() {
                    updates.push(ListUpdate::Inserted {
                        position: 0,
                        count: items.len(),
                    });
                }
                updates
            }
            UpdateOp::SetItem(position, item) => vec![ListUpdate::Changed {
                position: *position,
                count: 1,
                payload: self.differ.change_payload(&list[*position], item),
            }],
            UpdateOp::SetItems(_, items) if items.is_empty() => Vec::new(),
            UpdateOp::SetItems(position, items) => vec![ListUpdate::Changed {
                position: *position,
                count: items.len(),
                payload: None,
            }],
            UpdateOp::AddItem(position, _) => vec![ListUpdate::Inserted {
                position: *position,
                count: 1,
            }],
            UpdateOp::AddItems(_, items) if items.is_empty() => Vec::new(),
            UpdateOp::AddItems(position, items) => vec![ListUpdate::Inserted {
                position: *position,
                count: items.len(),
            }],
            UpdateOp::RemoveItems(_, 0) => Vec::new(),
            UpdateOp::RemoveItems(position, count) => vec![ListUpdate::Removed {
                position: *position,
                count: *count,
            }],
            UpdateOp::MoveItem(from, to) if from == to => Vec::new(),
            UpdateOp::MoveItem(from, to) => vec![ListUpdate::Moved {
                from: *from,
                to: *to,
            }],
        };

        op.apply(list)?;
        Ok(updates)
    }

    fn start_diff(
        self: &Arc<Self>,
        mut state: MutexGuard<'_, DifferState<T>>,
        op: UpdateOp<T>,
        completer: Completer<u64>,
    ) {
        let new_list = match &op {
            UpdateOp::SubmitList(items) => Arc::new(items.clone()),
            _ => return,
        };

        state.generation += 1;
        let generation = state.generation;
        let token = CancellationToken::new();
        let old_list = Arc::clone(&state.current);

        state.in_flight = Some(InFlightDiff {
            generation,
            token: token.clone(),
            op,
            new_list: Arc::clone(&new_list),
            completer,
        });
        drop(state);

        tracing::debug!(
            generation,
            old_len = old_list.len(),
            new_len = new_list.len(),
            "diff started"
        );

        let inner = Arc::clone(self);
        self.runtime.workers().execute(move || {
            let outcome: DiffOutcome<D::Payload> = panic::catch_unwind(AssertUnwindSafe(|| {
                calculate_diff(
                    old_list.as_slice(),
                    new_list.as_slice(),
                    &inner.differ,
                    inner.config.detect_moves,
                    &token,
                )
            }))
            .map_err(|payload| panic_message(payload.as_ref()));

            let owner = Arc::clone(&inner);
            inner
                .runtime
                .owner()
                .post(move || owner.finish_diff(generation, outcome));
        });
    }

    /// Apply a finished diff if it is still the current one.
    fn finish_diff(self: &Arc<Self>, generation: u64, outcome: DiffOutcome<D::Payload>) {
        let mut state = self.state.lock();
        let flight = match state.in_flight.take() {
            Some(flight) if flight.generation == generation => flight,
            other => {
                state.in_flight = other;
                tracing::trace!(generation, "discarding stale diff result");
                return;
            }
        };

        match outcome {
            Ok(Ok(result)) => {
                state.current = flight.new_list;
                let event = state.commit(flight.op);
                drop(state);

                tracing::debug!(generation, updates = result.updates().len(), "diff applied");
                self.publish(result.updates(), event, flight.completer);
                self.drain();
            }
            Ok(Err(PagingError::Cancelled)) => {
                drop(state);
                flight.completer.complete(Err(PagingError::Cancelled));
                self.drain();
            }
            Ok(Err(error)) => self.poison(state, error, flight.completer),
            Err(message) => self.poison(state, PagingError::DiffPanicked(message), flight.completer),
        }
    }

    /// Refuse every further update after a failure that leaves no
    /// consistent way forward. The list stays as it was before the
    /// failing op.
    fn poison(&self, mut state: MutexGuard<'_, DifferState<T>>, error: PagingError, completer: Completer<u64>) {
        tracing::error!(%error, "list differ poisoned");

        let reason = match &error {
            PagingError::DiffPanicked(message) => message.clone(),
            other => other.to_string(),
        };
        state.poisoned = Some(reason.clone());
        state.projected = Arc::clone(&state.current);
        let queued: Vec<Pending<T>> = state.queue.drain(..).collect();
        drop(state);

        for pending in queued {
            pending.complete(Err(PagingError::Poisoned(reason.clone())));
        }
        self.notify_error(&error);
        completer.complete(Err(error));
    }

    fn publish(&self, updates: &[ListUpdate<D::Payload>], event: ListEvent<T>, completer: Completer<u64>) {
        {
            let mut callback = self.callback.lock();
            for update in updates {
                update.dispatch(&mut **callback);
            }
        }
        {
            let mut listeners = self.list_listeners.lock();
            for listener in listeners.iter_mut() {
                listener(&event);
            }
        }
        tracing::trace!(version = event.version, "list update applied");
        completer.complete(Ok(event.version));
    }
}
