//! Mediator configuration and subscription handles.

use crate::diff::DifferConfig;
use crate::error::{PagingError, Result};
use crate::paging::PagingEvent;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a mediator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// Max buffered events before dropping the subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Configuration of the backing list differ.
    pub differ: DifferConfig,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            differ: DifferConfig::default(),
        }
    }
}

impl MediatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(PagingError::InvalidConfig(
                "buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// The single active consumer of a mediator's event stream.
///
/// The first event is always a `ListStateUpdate` carrying the whole list.
/// Dropping the subscription frees the slot for the next subscriber.
pub struct PagingSubscription<T> {
    pub(crate) id: SubscriptionId,
    pub(crate) receiver: Receiver<PagingEvent<T>>,
    pub(crate) active: Arc<AtomicBool>,
}

impl<T> PagingSubscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receive the next event (blocking).
    ///
    /// Returns `SubscriptionDropped` once the mediator has dropped this
    /// subscriber and every buffered event has been received.
    pub fn recv(&self) -> Result<PagingEvent<T>> {
        self.receiver
            .recv()
            .map_err(|_| PagingError::SubscriptionDropped)
    }

    /// Try to receive an event (non-blocking). `Ok(None)` when nothing is
    /// buffered.
    pub fn try_recv(&self) -> Result<Option<PagingEvent<T>>> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(PagingError::SubscriptionDropped),
        }
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<PagingEvent<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) => Err(PagingError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(PagingError::SubscriptionDropped),
        }
    }

    /// Whether the mediator still delivers to this subscription.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl<T> Drop for PagingSubscription<T> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

impl<T> std::fmt::Debug for PagingSubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagingSubscription")
            .field("id", &self.id)
            .field("buffered", &self.receiver.len())
            .finish()
    }
}
