//! Pager: runs loads through a [`PagingSource`] and emits paging events.

use super::source::{PagingConfig, PagingSource};
use super::state::{LoadRequest, LoadStateMachine};
use super::types::{LoadError, LoadResult, LoadStates, LoadType, PagingEvent};
use crate::diff::ListSnapshot;
use crate::error::{PagingError, Result};
use crate::runtime::{CancellationToken, Completer, Runtime, TaskHandle};
use crate::types::UpdateOp;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Receives a pager's events on the owner thread, in emission order.
pub trait PagingEventSink<T>: Send {
    fn emit(&mut self, event: PagingEvent<T>);
}

impl<T: Send> PagingEventSink<T> for Sender<PagingEvent<T>> {
    fn emit(&mut self, event: PagingEvent<T>) {
        // A dropped receiver just means nobody is listening.
        let _ = self.send(event);
    }
}

/// The list appends are computed against.
enum ListBinding<T> {
    /// The pager's own copy of what it emitted.
    Mirror(Arc<Vec<T>>),
    /// A list owned elsewhere, possibly mutated externally.
    Attached(Arc<dyn ListSnapshot<T>>),
}

impl<T> ListBinding<T> {
    fn snapshot(&self) -> Arc<Vec<T>> {
        match self {
            ListBinding::Mirror(list) => Arc::clone(list),
            ListBinding::Attached(list) => list.snapshot(),
        }
    }
}

struct ActiveLoad {
    generation: u64,
    token: CancellationToken,
    completer: Completer<LoadStates>,
}

struct PagerState<K, T> {
    machine: LoadStateMachine<K>,
    loads: Vec<ActiveLoad>,
    sink: Option<Box<dyn PagingEventSink<T>>>,
    list: ListBinding<T>,
    closed: bool,
}

impl<K, T> PagerState<K, T> {
    fn emit(&mut self, event: PagingEvent<T>) {
        if let Some(sink) = self.sink.as_mut() {
            sink.emit(event);
        }
    }

    fn take_load(&mut self, generation: u64) -> Option<ActiveLoad> {
        let index = self.loads.iter().position(|load| load.generation == generation)?;
        Some(self.loads.swap_remove(index))
    }

    fn cancel_loads(&mut self) {
        for load in self.loads.drain(..) {
            load.token.cancel();
            load.completer.complete(Err(PagingError::Cancelled));
        }
    }
}

struct PagerInner<K, T> {
    source: Arc<dyn PagingSource<K, T>>,
    config: PagingConfig,
    runtime: Runtime,
    state: Mutex<PagerState<K, T>>,
}

/// Drives a [`LoadStateMachine`] against a [`PagingSource`].
///
/// `refresh`, `append` and `retry` are queued on the owner thread and return
/// a handle resolving with the load states once the load has finished. A
/// call the state machine treats as a no-op resolves immediately with the
/// current states. Cancelling a handle abandons its load: the load type
/// returns to `Incomplete` and the late result is dropped.
pub struct Pager<K, T> {
    inner: Arc<PagerInner<K, T>>,
}

impl<K, T> Clone for Pager<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, T> Pager<K, T>
where
    K: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new<S>(runtime: Runtime, source: S, initial_key: Option<K>, config: PagingConfig) -> Result<Self>
    where
        S: PagingSource<K, T>,
    {
        config.validate()?;

        let state = PagerState {
            machine: LoadStateMachine::new(initial_key, &config),
            loads: Vec::new(),
            sink: None,
            list: ListBinding::Mirror(Arc::new(Vec::new())),
            closed: false,
        };

        Ok(Self {
            inner: Arc::new(PagerInner {
                source: Arc::new(source),
                config,
                runtime,
                state: Mutex::new(state),
            }),
        })
    }

    // --- Loads ---

    /// Cancel any in-flight load and reload from the initial key.
    pub fn refresh(&self) -> TaskHandle<LoadStates> {
        self.post(|inner, completer| inner.start_refresh(completer))
    }

    /// Load the next page, unless the state machine says otherwise.
    pub fn append(&self) -> TaskHandle<LoadStates> {
        self.post(|inner, completer| inner.start_append(completer))
    }

    /// Re-issue the most recently failed load.
    pub fn retry(&self) -> TaskHandle<LoadStates> {
        self.post(|inner, completer| inner.start_retry(completer))
    }

    /// Report that the item at `index` was accessed; appends when the index
    /// is within `prefetch_distance` of the end of the list.
    pub fn notify_item_accessed(&self, index: usize) {
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.owner().post(move || {
            let len = inner.state.lock().list.snapshot().len();
            if index.saturating_add(inner.config.prefetch_distance) >= len {
                let (completer, _handle) = inner.runtime.task();
                inner.start_append(completer);
            }
        });
    }

    fn post<F>(&self, start: F) -> TaskHandle<LoadStates>
    where
        F: FnOnce(&Arc<PagerInner<K, T>>, Completer<LoadStates>) + Send + 'static,
    {
        let (completer, handle) = self.inner.runtime.task();
        let inner = Arc::clone(&self.inner);
        self.inner.runtime.owner().post(move || start(&inner, completer));
        handle
    }

    // --- State ---

    pub fn load_states(&self) -> LoadStates {
        self.inner.state.lock().machine.states().clone()
    }

    pub fn config(&self) -> &PagingConfig {
        &self.inner.config
    }

    /// Send events to a channel, replacing any previous sink.
    pub fn events(&self) -> Receiver<PagingEvent<T>> {
        let (sender, receiver) = unbounded();
        self.inner.state.lock().sink = Some(Box::new(sender));
        receiver
    }

    /// Route events to `sink` and compute appends against `list`.
    pub(crate) fn attach(&self, sink: Box<dyn PagingEventSink<T>>, list: Arc<dyn ListSnapshot<T>>) {
        let mut state = self.inner.state.lock();
        state.sink = Some(sink);
        state.list = ListBinding::Attached(list);
    }
}

impl<K, T> Pager<K, T> {
    /// Cancel in-flight loads and stop emitting. Pending handles resolve
    /// `Cancelled`; later load requests do too.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.machine.cancel_all();
        state.cancel_loads();
        state.sink = None;
        tracing::debug!("pager closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

impl<K, T> PagerInner<K, T>
where
    K: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn start_refresh(self: &Arc<Self>, completer: Completer<LoadStates>) {
        let mut state = self.state.lock();
        if state.closed {
            completer.complete(Err(PagingError::Cancelled));
            return;
        }

        if !state.loads.is_empty() {
            tracing::debug!(cancelled = state.loads.len(), "refresh cancels in-flight loads");
        }
        state.cancel_loads();
        let request = state.machine.refresh();
        self.issue(&mut state, request, completer);
    }

    fn start_append(self: &Arc<Self>, completer: Completer<LoadStates>) {
        let mut state = self.state.lock();
        if state.closed {
            completer.complete(Err(PagingError::Cancelled));
            return;
        }

        let items = state.list.snapshot();
        let source = &self.source;
        match state
            .machine
            .append(|next_key| source.append_key(next_key, &items))
        {
            Some(request) => self.issue(&mut state, request, completer),
            None => completer.complete(Ok(state.machine.states().clone())),
        }
    }

    fn start_retry(self: &Arc<Self>, completer: Completer<LoadStates>) {
        let mut state = self.state.lock();
        if state.closed {
            completer.complete(Err(PagingError::Cancelled));
            return;
        }

        match state.machine.retry() {
            Some(request) => self.issue(&mut state, request, completer),
            None => completer.complete(Ok(state.machine.states().clone())),
        }
    }

    /// Emit the `Loading` transition and run the load on a worker.
    fn issue(
        self: &Arc<Self>,
        state: &mut PagerState<K, T>,
        request: LoadRequest<K>,
        completer: Completer<LoadStates>,
    ) {
        let load_type = request.load_type();
        let generation = request.generation;
        let token = completer.token().clone();

        state.loads.push(ActiveLoad {
            generation,
            token: token.clone(),
            completer,
        });
        let states = state.machine.states().clone();
        state.emit(PagingEvent::LoadStateUpdate { load_type, states });

        tracing::debug!(?load_type, generation, load_size = request.params.load_size(), "load issued");

        let inner = Arc::clone(self);
        self.runtime.workers().execute(move || {
            let result = if token.is_cancelled() {
                None
            } else {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| inner.source.load(request.params)));
                Some(outcome.unwrap_or_else(|payload| {
                    tracing::error!(?load_type, generation, "paging source panicked");
                    LoadResult::Failure(LoadError::from_panic(payload.as_ref()))
                }))
            };

            let owner = Arc::clone(&inner);
            inner
                .runtime
                .owner()
                .post(move || owner.finish(generation, result));
        });
    }

    /// Apply a load outcome on the owner thread. `None` means the load was
    /// cancelled before it ran.
    fn finish(&self, generation: u64, result: Option<LoadResult<K, T>>) {
        let mut state = self.state.lock();
        if !state.machine.is_active(generation) {
            tracing::trace!(generation, "dropping stale load result");
            return;
        }
        let Some(load) = state.take_load(generation) else {
            return;
        };

        let result = match result {
            Some(result) if !load.token.is_cancelled() => result,
            _ => {
                if let Some(load_type) = state.machine.abandon(generation) {
                    let states = state.machine.states().clone();
                    state.emit(PagingEvent::LoadStateUpdate { load_type, states });
                    tracing::debug!(?load_type, generation, "load cancelled");
                }
                load.completer.complete(Err(PagingError::Cancelled));
                return;
            }
        };

        match result {
            LoadResult::Success { data, next_key } => {
                let Some(load_type) = state.machine.succeed(generation, next_key) else {
                    return;
                };
                let states = state.machine.states().clone();
                tracing::debug!(?load_type, generation, items = data.len(), "load succeeded");

                state.emit(PagingEvent::LoadStateUpdate {
                    load_type,
                    states: states.clone(),
                });
                state.emit(PagingEvent::LoadDataSuccess {
                    data: data.clone(),
                    load_type,
                    states: states.clone(),
                });

                let op = match load_type {
                    LoadType::Refresh => UpdateOp::SubmitList(data),
                    LoadType::Append => UpdateOp::AddItems(state.list.snapshot().len(), data),
                };
                if let ListBinding::Mirror(list) = &mut state.list {
                    if let Err(error) = op.apply(Arc::make_mut(list)) {
                        tracing::warn!(%error, "mirrored list rejected a load result");
                    }
                }
                state.emit(PagingEvent::ListStateUpdate {
                    op,
                    states: states.clone(),
                });

                load.completer.complete(Ok(states));
            }
            LoadResult::Failure(error) => {
                tracing::debug!(generation, %error, "load failed");
                let Some(load_type) = state.machine.fail(generation, error) else {
                    return;
                };
                let states = state.machine.states().clone();
                state.emit(PagingEvent::LoadStateUpdate {
                    load_type,
                    states: states.clone(),
                });

                load.completer.complete(Ok(states));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::{LoadParams, LoadState};
    use crate::runtime::RuntimeConfig;
    use std::time::Duration;

    /// Serves `total` integers in pages keyed by offset.
    struct Numbers {
        total: usize,
        calls: Arc<Mutex<Vec<LoadParams<usize>>>>,
        fail_appends: Mutex<usize>,
    }

    impl Numbers {
        fn new(total: usize) -> Self {
            Self {
                total,
                calls: Arc::default(),
                fail_appends: Mutex::new(0),
            }
        }
    }

    impl PagingSource<usize, usize> for Numbers {
        fn load(&self, params: LoadParams<usize>) -> LoadResult<usize, usize> {
            self.calls.lock().push(params.clone());

            if let LoadParams::Append { .. } = params {
                let mut failures = self.fail_appends.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return LoadResult::failure("append failed");
                }
            }

            let start = params.key().copied().unwrap_or(0);
            let end = (start + params.load_size()).min(self.total);
            let next_key = (end < self.total).then_some(end);
            LoadResult::success((start..end).collect(), next_key)
        }
    }

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::default()).unwrap()
    }

    fn drain(events: &Receiver<PagingEvent<usize>>) -> Vec<PagingEvent<usize>> {
        std::iter::from_fn(|| events.recv_timeout(Duration::from_millis(50)).ok()).collect()
    }

    #[test]
    fn test_refresh_emits_state_data_list_in_order() {
        let pager = Pager::new(runtime(), Numbers::new(5), None, PagingConfig::new(3)).unwrap();
        let events = pager.events();

        let states = pager.refresh().wait().unwrap();
        assert_eq!(
            states.refresh,
            LoadState::Success {
                end_of_pagination_reached: false
            }
        );

        let events = drain(&events);
        assert_eq!(events.len(), 4);
        assert!(matches!(
            &events[0],
            PagingEvent::LoadStateUpdate { states, .. } if states.refresh == LoadState::Loading
        ));
        assert!(matches!(&events[1], PagingEvent::LoadStateUpdate { .. }));
        assert!(matches!(
            &events[2],
            PagingEvent::LoadDataSuccess { data, load_type: LoadType::Refresh, .. } if *data == vec![0, 1, 2]
        ));
        assert!(matches!(
            &events[3],
            PagingEvent::ListStateUpdate { op: UpdateOp::SubmitList(items), .. } if *items == vec![0, 1, 2]
        ));
    }

    #[test]
    fn test_append_uses_mirrored_list_position() {
        let pager = Pager::new(runtime(), Numbers::new(5), None, PagingConfig::new(3)).unwrap();
        let events = pager.events();

        pager.refresh().wait().unwrap();
        let states = pager.append().wait().unwrap();
        assert!(states.append.end_of_pagination_reached());

        let last = drain(&events).pop().unwrap();
        assert_eq!(
            last,
            PagingEvent::ListStateUpdate {
                op: UpdateOp::AddItems(3, vec![3, 4]),
                states,
            }
        );
    }

    #[test]
    fn test_append_before_refresh_is_noop() {
        let source = Numbers::new(5);
        let calls = Arc::clone(&source.calls);
        let pager = Pager::new(runtime(), source, None, PagingConfig::new(3)).unwrap();

        let states = pager.append().wait().unwrap();
        assert_eq!(states, LoadStates::default());
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn test_retry_after_failed_append() {
        let source = Numbers::new(10);
        *source.fail_appends.lock() = 1;
        let calls = Arc::clone(&source.calls);
        let pager = Pager::new(runtime(), source, None, PagingConfig::new(4)).unwrap();

        pager.refresh().wait().unwrap();
        let failed = pager.append().wait().unwrap();
        assert_eq!(
            failed.append,
            LoadState::Failure(LoadError::new("append failed"))
        );

        let retried = pager.retry().wait().unwrap();
        assert_eq!(
            retried.append,
            LoadState::Success {
                end_of_pagination_reached: false
            }
        );

        let calls = calls.lock();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1], calls[2]);
        assert_eq!(calls[2], LoadParams::Append { key: 4, load_size: 4 });
    }

    struct Panicking;

    impl PagingSource<u32, u32> for Panicking {
        fn load(&self, _params: LoadParams<u32>) -> LoadResult<u32, u32> {
            panic!("database on fire")
        }
    }

    #[test]
    fn test_source_panic_becomes_failure() {
        let pager = Pager::new(runtime(), Panicking, None, PagingConfig::default()).unwrap();

        let states = pager.refresh().wait().unwrap();
        match states.refresh {
            LoadState::Failure(error) => assert!(error.message().contains("database on fire")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_notify_item_accessed_prefetches() {
        let source = Numbers::new(100);
        let calls = Arc::clone(&source.calls);
        let config = PagingConfig {
            page_size: 10,
            initial_load_size: 10,
            prefetch_distance: 2,
        };
        let pager = Pager::new(runtime(), source, None, config).unwrap();
        pager.refresh().wait().unwrap();

        pager.notify_item_accessed(3);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.lock().len(), 1);

        pager.notify_item_accessed(8);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(calls.lock().len(), 2);
    }

    #[test]
    fn test_notify_far_past_the_end_appends() {
        let source = Numbers::new(100);
        let calls = Arc::clone(&source.calls);
        let pager = Pager::new(runtime(), source, None, PagingConfig::new(10)).unwrap();
        pager.refresh().wait().unwrap();

        pager.notify_item_accessed(usize::MAX);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(calls.lock().len(), 2);
        assert_eq!(
            pager.load_states().append,
            LoadState::Success {
                end_of_pagination_reached: false
            }
        );
    }

    #[test]
    fn test_closed_pager_rejects_loads() {
        let pager = Pager::new(runtime(), Numbers::new(5), None, PagingConfig::default()).unwrap();
        pager.close();

        assert!(pager.is_closed());
        assert_eq!(pager.refresh().wait(), Err(PagingError::Cancelled));
    }

    #[test]
    fn test_invalid_config() {
        let result = Pager::<usize, usize>::new(runtime(), Numbers::new(1), None, PagingConfig::new(0));
        assert!(matches!(result, Err(PagingError::InvalidConfig(_))));
    }
}
