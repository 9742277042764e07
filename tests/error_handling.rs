//! Error handling and edge case tests.

use pagelist::{
    AsyncListDiffer, DifferConfig, EqDiffer, ItemDiffer, ListUpdate, LoadError, LoadParams,
    LoadResult, LoadState, MediatorConfig, Pager, PagingConfig, PagingError, PagingMediator,
    PagingSource, Runtime, RuntimeConfig, UpdateOp,
};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn runtime() -> Runtime {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Runtime::new(RuntimeConfig::default()).unwrap()
}

/// Offset-keyed source that can fail or stall on demand.
#[derive(Default)]
struct FlakySource {
    total: u32,
    fail_refreshes: AtomicUsize,
    fail_appends: AtomicUsize,
    calls: Arc<Mutex<Vec<LoadParams<u32>>>>,
    stall: Option<Arc<(Mutex<bool>, Condvar)>>,
}

impl FlakySource {
    fn new(total: u32) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl PagingSource<u32, u32> for FlakySource {
    fn load(&self, params: LoadParams<u32>) -> LoadResult<u32, u32> {
        self.calls.lock().push(params.clone());

        if let Some(stall) = &self.stall {
            let (released, cvar) = &**stall;
            let mut released = released.lock();
            while !*released {
                cvar.wait(&mut released);
            }
        }

        let counter = match params {
            LoadParams::Refresh { .. } => &self.fail_refreshes,
            LoadParams::Append { .. } => &self.fail_appends,
        };
        if Self::take_failure(counter) {
            return LoadResult::Failure(LoadError::new("service unavailable"));
        }

        let start = params.key().copied().unwrap_or(0);
        let end = (start + params.load_size() as u32).min(self.total);
        LoadResult::success((start..end).collect(), (end < self.total).then_some(end))
    }
}

fn release(stall: &Arc<(Mutex<bool>, Condvar)>) {
    *stall.0.lock() = true;
    stall.1.notify_all();
}

// --- Load Failures ---

#[test]
fn test_retry_reissues_failed_append() {
    let source = FlakySource::new(7);
    source.fail_appends.store(1, Ordering::SeqCst);
    let calls = Arc::clone(&source.calls);
    let pager = Pager::new(runtime(), source, None, PagingConfig::new(4)).unwrap();

    pager.refresh().wait().unwrap();
    let states = pager.append().wait().unwrap();
    assert_eq!(
        states.append,
        LoadState::Failure(LoadError::new("service unavailable"))
    );

    // Failure is terminal for append until retry.
    pager.append().wait().unwrap();
    assert_eq!(calls.lock().len(), 2);

    let states = pager.retry().wait().unwrap();
    assert_eq!(
        states.append,
        LoadState::Success {
            end_of_pagination_reached: true
        }
    );

    let calls = calls.lock();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2], LoadParams::Append { key: 4, load_size: 4 });
    assert_eq!(calls[1], calls[2]);
}

#[test]
fn test_retry_without_failure_is_noop() {
    let source = FlakySource::new(10);
    let calls = Arc::clone(&source.calls);
    let pager = Pager::new(runtime(), source, None, PagingConfig::new(4)).unwrap();

    pager.retry().wait().unwrap();
    pager.refresh().wait().unwrap();
    pager.retry().wait().unwrap();

    assert_eq!(calls.lock().len(), 1);
}

#[test]
fn test_refresh_failure_then_retry() {
    let source = FlakySource::new(3);
    source.fail_refreshes.store(1, Ordering::SeqCst);
    let pager = Pager::new(runtime(), source, Some(0), PagingConfig::new(5)).unwrap();

    let states = pager.refresh().wait().unwrap();
    assert!(states.refresh.is_failure());
    assert_eq!(states.append, LoadState::Incomplete);

    // No append without a successful refresh.
    assert_eq!(pager.append().wait().unwrap(), states);

    let states = pager.retry().wait().unwrap();
    assert!(states.refresh.end_of_pagination_reached());
    assert!(states.append.end_of_pagination_reached());
}

#[test]
fn test_double_append_issues_one_load() {
    let stall = Arc::new((Mutex::new(true), Condvar::new()));
    let source = FlakySource {
        stall: Some(Arc::clone(&stall)),
        ..FlakySource::new(100)
    };
    let calls = Arc::clone(&source.calls);
    let pager = Pager::new(runtime(), source, None, PagingConfig::new(10)).unwrap();
    pager.refresh().wait().unwrap();

    *stall.0.lock() = false;
    let first = pager.append();
    let second = pager.append();

    let states = second.wait().unwrap();
    assert_eq!(states.append, LoadState::Loading);

    release(&stall);
    first.wait().unwrap();
    assert_eq!(calls.lock().len(), 2);
}

#[test]
fn test_cancelled_load_returns_to_incomplete() {
    let stall = Arc::new((Mutex::new(true), Condvar::new()));
    let source = FlakySource {
        stall: Some(Arc::clone(&stall)),
        ..FlakySource::new(100)
    };
    let pager = Pager::new(runtime(), source, None, PagingConfig::new(10)).unwrap();
    let events = pager.events();
    pager.refresh().wait().unwrap();

    *stall.0.lock() = false;
    let append = pager.append();
    std::thread::sleep(Duration::from_millis(20));
    append.cancel();
    release(&stall);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(pager.load_states().append, LoadState::Incomplete);

    let last = events.try_iter().last().unwrap();
    assert_eq!(last.states().append, LoadState::Incomplete);
    assert!(matches!(last, pagelist::PagingEvent::LoadStateUpdate { .. }));
}

struct ExplodingSource;

impl PagingSource<u32, u32> for ExplodingSource {
    fn load(&self, _params: LoadParams<u32>) -> LoadResult<u32, u32> {
        panic!("connection pool exhausted")
    }
}

#[test]
fn test_source_panic_is_contained() {
    let runtime = runtime();
    let pager = Pager::new(runtime.clone(), ExplodingSource, None, PagingConfig::default()).unwrap();

    let states = pager.refresh().wait().unwrap();
    assert!(states.refresh.is_failure());

    // The owner context survives.
    assert_eq!(runtime.spawn(|_| 1).wait(), Ok(1));
    assert!(pager.retry().wait().unwrap().refresh.is_failure());
}

// --- Differ Errors ---

#[test]
fn test_invalid_update_reported_asynchronously() {
    let differ = AsyncListDiffer::new(
        runtime(),
        EqDiffer::<u8>::new(),
        Vec::<ListUpdate<()>>::new(),
        DifferConfig::default(),
    );
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    differ.set_error_listener(move |error| sink.lock().push(error.clone()));

    differ.update_list(UpdateOp::SubmitList(vec![1, 2]));
    differ.update_list(UpdateOp::MoveItem(0, 2));
    differ.update_list(UpdateOp::SetItem(1, 9));
    differ.flush().wait().unwrap();

    assert_eq!(*differ.current_list(), vec![1, 9]);
    assert_eq!(
        *errors.lock(),
        vec![PagingError::IndexOutOfBounds { index: 2, len: 2 }]
    );
}

struct Inconsistent;

impl ItemDiffer<String> for Inconsistent {
    type Payload = ();

    fn are_items_the_same(&self, old: &String, _new: &String) -> bool {
        if old == "bad" {
            panic!("comparator bug");
        }
        false
    }

    fn are_contents_the_same(&self, _old: &String, _new: &String) -> bool {
        true
    }
}

#[test]
fn test_predicate_panic_surfaces_and_poisons() {
    let differ = AsyncListDiffer::new(
        runtime(),
        Inconsistent,
        Vec::<ListUpdate<()>>::new(),
        DifferConfig::default(),
    );
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    differ.set_error_listener(move |error| sink.lock().push(error.clone()));

    differ
        .await_update_list(UpdateOp::SubmitList(vec!["bad".to_string()]))
        .unwrap();
    let panicked = differ.submit(UpdateOp::SubmitList(vec!["x".to_string()]));
    let queued = differ.submit(UpdateOp::AddItem(0, "y".to_string()));

    assert_eq!(
        panicked.wait(),
        Err(PagingError::DiffPanicked("comparator bug".to_string()))
    );
    assert!(matches!(queued.wait(), Err(PagingError::Poisoned(_))));
    assert!(matches!(differ.flush().wait(), Err(PagingError::Poisoned(_))));
    assert_eq!(
        errors.lock().first(),
        Some(&PagingError::DiffPanicked("comparator bug".to_string()))
    );
}

#[test]
fn test_wait_on_owner_thread_is_rejected() {
    let runtime = runtime();
    let differ = AsyncListDiffer::new(
        runtime.clone(),
        EqDiffer::<u8>::new(),
        Vec::<ListUpdate<()>>::new(),
        DifferConfig::default(),
    );

    let (tx, rx) = crossbeam_channel::bounded(1);
    let inner = differ.clone();
    runtime.owner().post(move || {
        let result = inner.await_update_list(UpdateOp::AddItem(0, 1));
        tx.send(result).unwrap();
    });

    assert_eq!(
        rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        Err(PagingError::WaitOnOwnerThread)
    );
    // The op itself was still queued.
    differ.flush().wait().unwrap();
    assert_eq!(*differ.current_list(), vec![1]);
}

// --- Subscription Misuse ---

#[test]
fn test_concurrent_subscription_rejected() {
    let mediator = PagingMediator::<u32, u32, _>::new(
        runtime(),
        EqDiffer::new(),
        Vec::<ListUpdate<()>>::new(),
        MediatorConfig::default(),
    )
    .unwrap();

    let _active = mediator.subscribe().unwrap();
    assert_eq!(
        mediator.subscribe().unwrap_err(),
        PagingError::ConcurrentSubscription
    );
}

#[test]
fn test_mediator_without_pager() {
    let mediator = PagingMediator::<u32, u32, _>::new(
        runtime(),
        EqDiffer::new(),
        Vec::<ListUpdate<()>>::new(),
        MediatorConfig::default(),
    )
    .unwrap();

    assert!(matches!(mediator.append(), Err(PagingError::NoUpstream)));
    assert!(matches!(mediator.retry(), Err(PagingError::NoUpstream)));

    // The shared list still works on its own.
    mediator.insert(0, 5).wait().unwrap();
    assert_eq!(*mediator.current_list(), vec![5]);
}

#[test]
fn test_zero_page_size_rejected() {
    let result = Pager::new(runtime(), FlakySource::new(1), None, PagingConfig::new(0));
    assert!(matches!(result, Err(PagingError::InvalidConfig(_))));
}
