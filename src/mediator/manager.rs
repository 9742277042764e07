//! Paging mediator: pager events in, differ-backed list plus one subscriber out.

use super::types::{MediatorConfig, PagingSubscription, SubscriptionId};
use crate::diff::{AsyncListDiffer, ItemDiffer, ListUpdateCallback};
use crate::error::{PagingError, Result};
use crate::paging::{LoadStates, Pager, PagingEvent, PagingEventSink};
use crate::runtime::{resolved, Runtime, TaskHandle};
use crate::types::UpdateOp;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Internal subscriber state.
struct Subscriber<T> {
    id: SubscriptionId,
    sender: Sender<PagingEvent<T>>,
    active: Arc<AtomicBool>,
}

struct Upstream<K, T> {
    id: u64,
    pager: Pager<K, T>,
}

struct MediatorState<K, T> {
    /// Load states as of the last forwarded event.
    states: LoadStates,
    upstream: Option<Upstream<K, T>>,
    next_upstream_id: u64,
    subscriber: Option<Subscriber<T>>,
}

struct MediatorInner<K, T, D: ItemDiffer<T>> {
    differ: AsyncListDiffer<T, D>,
    config: MediatorConfig,
    next_subscriber_id: AtomicU64,
    state: Mutex<MediatorState<K, T>>,
}

/// Bridges a [`Pager`] into a shared, differ-backed list.
///
/// Upstream list updates and external mutations go through one
/// [`AsyncListDiffer`], so both follow the same ordering rules. Events are
/// forwarded to at most one subscriber; a new subscriber starts from a
/// snapshot of the pending list instead of a replay.
///
/// Lock order is pager, then mediator, then differ.
pub struct PagingMediator<K, T, D: ItemDiffer<T>> {
    inner: Arc<MediatorInner<K, T, D>>,
}

impl<K, T, D> PagingMediator<K, T, D>
where
    K: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    D: ItemDiffer<T>,
{
    pub fn new<C>(runtime: Runtime, differ: D, callback: C, config: MediatorConfig) -> Result<Self>
    where
        C: ListUpdateCallback<D::Payload> + 'static,
    {
        config.validate()?;
        let differ = AsyncListDiffer::new(runtime, differ, callback, config.differ.clone());

        Ok(Self {
            inner: Arc::new(MediatorInner {
                differ,
                config,
                next_subscriber_id: AtomicU64::new(1),
                state: Mutex::new(MediatorState {
                    states: LoadStates::default(),
                    upstream: None,
                    next_upstream_id: 1,
                    subscriber: None,
                }),
            }),
        })
    }

    // --- Upstream ---

    /// Make `pager` the only upstream and start its initial refresh.
    ///
    /// The previous pager is closed: its in-flight loads are cancelled and
    /// anything it still emits is ignored.
    pub fn submit_pager(&self, pager: Pager<K, T>) -> TaskHandle<LoadStates> {
        let (upstream_id, previous) = {
            let mut state = self.inner.state.lock();
            let id = state.next_upstream_id;
            state.next_upstream_id += 1;
            state.states = LoadStates::default();
            let previous = state.upstream.replace(Upstream {
                id,
                pager: pager.clone(),
            });
            (id, previous)
        };

        if let Some(previous) = previous {
            previous.pager.close();
            tracing::debug!(from = previous.id, to = upstream_id, "upstream switched");
        }

        let sink = MediatorSink {
            inner: Arc::downgrade(&self.inner),
            upstream_id,
        };
        pager.attach(Box::new(sink), Arc::new(self.inner.differ.clone()));
        pager.refresh()
    }

    fn upstream(&self) -> Result<Pager<K, T>> {
        self.inner
            .state
            .lock()
            .upstream
            .as_ref()
            .map(|upstream| upstream.pager.clone())
            .ok_or(PagingError::NoUpstream)
    }

    pub fn refresh(&self) -> Result<TaskHandle<LoadStates>> {
        Ok(self.upstream()?.refresh())
    }

    pub fn append(&self) -> Result<TaskHandle<LoadStates>> {
        Ok(self.upstream()?.append())
    }

    pub fn retry(&self) -> Result<TaskHandle<LoadStates>> {
        Ok(self.upstream()?.retry())
    }

    pub fn notify_item_accessed(&self, index: usize) -> Result<()> {
        self.upstream()?.notify_item_accessed(index);
        Ok(())
    }

    // --- External mutation ---

    /// Apply `op` to the shared list outside the paging flow.
    ///
    /// Out-of-range ops are rejected here: the handle resolves with the
    /// error and the subscriber never sees them.
    pub fn mutate(&self, op: UpdateOp<T>) -> TaskHandle<u64> {
        let mut state = self.inner.state.lock();
        let forwarded = op.clone();

        match self.inner.differ.try_submit_with(move |_| op) {
            Ok(handle) => {
                let event = PagingEvent::ListStateUpdate {
                    op: forwarded,
                    states: state.states.clone(),
                };
                self.inner.forward(&mut state, event);
                handle
            }
            Err(error) => {
                tracing::warn!(%error, "external list mutation rejected");
                resolved(Err(error))
            }
        }
    }

    pub fn insert(&self, position: usize, item: T) -> TaskHandle<u64> {
        self.mutate(UpdateOp::AddItem(position, item))
    }

    pub fn remove(&self, position: usize, count: usize) -> TaskHandle<u64> {
        self.mutate(UpdateOp::RemoveItems(position, count))
    }

    // --- Subscription ---

    /// Become the single consumer of the event stream.
    ///
    /// Fails with `ConcurrentSubscription` while another subscription is
    /// alive. The first event is a `ListStateUpdate(SubmitList(..))` with
    /// the pending list and current load states.
    pub fn subscribe(&self) -> Result<PagingSubscription<T>> {
        let mut state = self.inner.state.lock();
        if let Some(existing) = &state.subscriber {
            if existing.active.load(Ordering::SeqCst) {
                return Err(PagingError::ConcurrentSubscription);
            }
        }

        let id = SubscriptionId(self.inner.next_subscriber_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.inner.config.buffer_size);

        let snapshot = PagingEvent::ListStateUpdate {
            op: UpdateOp::SubmitList(self.inner.differ.pending_list().to_vec()),
            states: state.states.clone(),
        };
        // Fresh channel with capacity >= 1.
        let _ = sender.try_send(snapshot);

        let active = Arc::new(AtomicBool::new(true));
        state.subscriber = Some(Subscriber {
            id,
            sender,
            active: Arc::clone(&active),
        });

        tracing::debug!(subscriber = id.0, "subscriber attached");
        Ok(PagingSubscription {
            id,
            receiver,
            active,
        })
    }

    /// Whether a live subscription exists.
    pub fn has_subscriber(&self) -> bool {
        self.inner
            .state
            .lock()
            .subscriber
            .as_ref()
            .is_some_and(|subscriber| subscriber.active.load(Ordering::SeqCst))
    }

    // --- State ---

    pub fn current_list(&self) -> Arc<Vec<T>> {
        self.inner.differ.current_list()
    }

    pub fn pending_list(&self) -> Arc<Vec<T>> {
        self.inner.differ.pending_list()
    }

    pub fn load_states(&self) -> LoadStates {
        self.inner.state.lock().states.clone()
    }

    /// Resolve once every list update queued so far has been applied.
    pub fn flush(&self) -> TaskHandle<u64> {
        self.inner.differ.flush()
    }

    /// The backing differ, for listeners.
    pub fn differ(&self) -> &AsyncListDiffer<T, D> {
        &self.inner.differ
    }
}

impl<K, T, D: ItemDiffer<T>> Drop for PagingMediator<K, T, D> {
    fn drop(&mut self) {
        let upstream = self.inner.state.lock().upstream.take();
        if let Some(upstream) = upstream {
            upstream.pager.close();
        }
    }
}

impl<K, T, D> MediatorInner<K, T, D>
where
    K: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    D: ItemDiffer<T>,
{
    /// Handle one event from upstream `upstream_id`. Runs on the owner
    /// thread with the pager's lock held.
    fn on_upstream(&self, upstream_id: u64, event: PagingEvent<T>) {
        let mut state = self.state.lock();
        if state.upstream.as_ref().map(|upstream| upstream.id) != Some(upstream_id) {
            tracing::trace!(upstream_id, "dropping event from replaced upstream");
            return;
        }

        let event = match event {
            PagingEvent::ListStateUpdate { op, states } => {
                let mut applied = None;
                let submitted = self.differ.try_submit_with(|pending| {
                    // Appends land after everything already queued, including
                    // external mutations.
                    let op = match op {
                        UpdateOp::AddItems(_, items) => UpdateOp::AddItems(pending.len(), items),
                        other => other,
                    };
                    applied = Some(op.clone());
                    op
                });

                if let Err(error) = submitted {
                    tracing::warn!(%error, "upstream list update rejected");
                    state.states = states;
                    return;
                }
                let Some(op) = applied else {
                    return;
                };
                PagingEvent::ListStateUpdate { op, states }
            }
            other => other,
        };

        state.states = event.states().clone();
        self.forward(&mut state, event);
    }

    /// Send to the subscriber, dropping it if it cannot keep up.
    fn forward(&self, state: &mut MediatorState<K, T>, event: PagingEvent<T>) {
        let Some(subscriber) = state.subscriber.as_ref() else {
            return;
        };
        if !subscriber.active.load(Ordering::SeqCst) {
            state.subscriber = None;
            return;
        }

        match subscriber.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    subscriber = subscriber.id.0,
                    buffer_size = self.config.buffer_size,
                    "subscriber buffer overflowed; dropping subscriber"
                );
                subscriber.active.store(false, Ordering::SeqCst);
                state.subscriber = None;
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!(subscriber = subscriber.id.0, "subscriber disconnected");
                state.subscriber = None;
            }
        }
    }
}

/// Pager sink that feeds a mediator.
struct MediatorSink<K, T, D: ItemDiffer<T>> {
    inner: Weak<MediatorInner<K, T, D>>,
    upstream_id: u64,
}

impl<K, T, D> PagingEventSink<T> for MediatorSink<K, T, D>
where
    K: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    D: ItemDiffer<T>,
{
    fn emit(&mut self, event: PagingEvent<T>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_upstream(self.upstream_id, event);
        }
    }
}
