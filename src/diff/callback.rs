//! Item predicates and positional update callbacks.

use crate::types::ListUpdate;
use std::fmt;
use std::marker::PhantomData;

/// Caller-supplied identity and content predicates used by the diff.
///
/// Predicates must be total and deterministic for the duration of a diff.
/// A predicate that panics is treated as a programming error, not caught
/// and retried.
pub trait ItemDiffer<T>: Send + Sync + 'static {
    /// Payload attached to change notifications (`()` when unused).
    type Payload: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    /// Whether two items represent the same entity.
    fn are_items_the_same(&self, old: &T, new: &T) -> bool;

    /// Whether two items that are the same entity also display the same.
    fn are_contents_the_same(&self, old: &T, new: &T) -> bool;

    /// Optional partial-change description for a changed item.
    fn change_payload(&self, _old: &T, _new: &T) -> Option<Self::Payload> {
        None
    }
}

/// Uses `PartialEq` for both identity and contents.
pub struct EqDiffer<T>(PhantomData<fn(&T)>);

impl<T> EqDiffer<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for EqDiffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PartialEq + 'static> ItemDiffer<T> for EqDiffer<T> {
    type Payload = ();

    fn are_items_the_same(&self, old: &T, new: &T) -> bool {
        old == new
    }

    fn are_contents_the_same(&self, old: &T, new: &T) -> bool {
        old == new
    }
}

/// Identity by key, contents by `PartialEq`.
pub struct KeyDiffer<T, K, F> {
    key: F,
    _marker: PhantomData<fn(&T) -> K>,
}

impl<T, K, F> KeyDiffer<T, K, F>
where
    F: Fn(&T) -> K,
{
    pub fn new(key: F) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }
}

impl<T, K, F> ItemDiffer<T> for KeyDiffer<T, K, F>
where
    T: PartialEq + 'static,
    K: PartialEq + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    type Payload = ();

    fn are_items_the_same(&self, old: &T, new: &T) -> bool {
        (self.key)(old) == (self.key)(new)
    }

    fn are_contents_the_same(&self, old: &T, new: &T) -> bool {
        old == new
    }
}

/// Receives positional changes, in order, on the owner thread.
///
/// Positions are relative to the list as it stands after every previously
/// delivered update. `on_moved(from, to)` removes the item at `from` and
/// reinserts it so that it ends up at `to`.
pub trait ListUpdateCallback<P>: Send {
    fn on_inserted(&mut self, position: usize, count: usize);
    fn on_removed(&mut self, position: usize, count: usize);
    fn on_moved(&mut self, from: usize, to: usize);
    fn on_changed(&mut self, position: usize, count: usize, payload: Option<&P>);
}

/// Recording callback.
impl<P: Clone + Send> ListUpdateCallback<P> for Vec<ListUpdate<P>> {
    fn on_inserted(&mut self, position: usize, count: usize) {
        self.push(ListUpdate::Inserted { position, count });
    }

    fn on_removed(&mut self, position: usize, count: usize) {
        self.push(ListUpdate::Removed { position, count });
    }

    fn on_moved(&mut self, from: usize, to: usize) {
        self.push(ListUpdate::Moved { from, to });
    }

    fn on_changed(&mut self, position: usize, count: usize, payload: Option<&P>) {
        self.push(ListUpdate::Changed {
            position,
            count,
            payload: payload.cloned(),
        });
    }
}

/// Coalesces adjacent updates of the same kind before forwarding them.
///
/// Consecutive inserts, removes and equal-payload changes over touching
/// ranges merge into one notification. Moves are forwarded as-is. Call
/// [`flush`](Self::flush) after the last update.
pub struct BatchingCallback<C, P> {
    inner: C,
    pending: Option<ListUpdate<P>>,
}

impl<C, P> BatchingCallback<C, P>
where
    C: ListUpdateCallback<P>,
    P: Clone + PartialEq,
{
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            pending: None,
        }
    }

    /// Forward the buffered update, if any.
    pub fn flush(&mut self) {
        if let Some(update) = self.pending.take() {
            update.dispatch(&mut self.inner);
        }
    }

    /// Flush and return the wrapped callback.
    pub fn into_inner(mut self) -> C {
        self.flush();
        self.inner
    }
}

impl<C, P> ListUpdateCallback<P> for BatchingCallback<C, P>
where
    C: ListUpdateCallback<P>,
    P: Clone + PartialEq + Send,
{
    fn on_inserted(&mut self, position: usize, count: usize) {
        if let Some(ListUpdate::Inserted {
            position: last,
            count: last_count,
        }) = &mut self.pending
        {
            if position >= *last && position <= *last + *last_count {
                *last_count += count;
                return;
            }
        }
        self.flush();
        self.pending = Some(ListUpdate::Inserted { position, count });
    }

    fn on_removed(&mut self, position: usize, count: usize) {
        if let Some(ListUpdate::Removed {
            position: last,
            count: last_count,
        }) = &mut self.pending
        {
            if *last >= position && *last <= position + count {
                *last_count += count;
                *last = position;
                return;
            }
        }
        self.flush();
        self.pending = Some(ListUpdate::Removed { position, count });
    }

    fn on_moved(&mut self, from: usize, to: usize) {
        self.flush();
        self.inner.on_moved(from, to);
    }

    fn on_changed(&mut self, position: usize, count: usize, payload: Option<&P>) {
        if let Some(ListUpdate::Changed {
            position: last,
            count: last_count,
            payload: last_payload,
        }) = &mut self.pending
        {
            let last_end = *last + *last_count;
            if position <= last_end && position + count >= *last && last_payload.as_ref() == payload
            {
                let end = last_end.max(position + count);
                *last = (*last).min(position);
                *last_count = end - *last;
                return;
            }
        }
        self.flush();
        self.pending = Some(ListUpdate::Changed {
            position,
            count,
            payload: payload.cloned(),
        });
    }
}
