//! Task handles and cooperative cancellation.

use crate::error::{PagingError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Shared cancellation flag, checked by workers at safe points.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PagingError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Handle to a pending result.
///
/// This is how suspending calls are modelled: the caller holds the handle
/// and either waits on it or cancels it. Cancelling signals the task's
/// [`CancellationToken`]; whether in-flight work stops is up to the code
/// that owns the task.
pub struct TaskHandle<T> {
    receiver: Receiver<Result<T>>,
    token: CancellationToken,
    owner_thread: Option<ThreadId>,
}

impl<T> TaskHandle<T> {
    /// Signal cancellation to the task.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Block until the task resolves.
    ///
    /// Blocking on the owner thread would stall the very loop that has to
    /// complete the task, so that returns `WaitOnOwnerThread` unless the
    /// result is already available.
    pub fn wait(self) -> Result<T> {
        match self.receiver.try_recv() {
            Ok(result) => return result,
            Err(TryRecvError::Disconnected) => return Err(PagingError::TaskDropped),
            Err(TryRecvError::Empty) => {}
        }
        if self.on_owner_thread() {
            return Err(PagingError::WaitOnOwnerThread);
        }
        self.receiver
            .recv()
            .unwrap_or(Err(PagingError::TaskDropped))
    }

    /// Block until the task resolves or the timeout elapses.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        if self.on_owner_thread() && self.receiver.is_empty() {
            return Err(PagingError::WaitOnOwnerThread);
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(PagingError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(PagingError::TaskDropped),
        }
    }

    /// Non-blocking poll. `None` while the task is still pending.
    pub fn try_wait(&self) -> Option<Result<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(PagingError::TaskDropped)),
        }
    }

    fn on_owner_thread(&self) -> bool {
        self.owner_thread == Some(thread::current().id())
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("cancelled", &self.is_cancelled())
            .field("ready", &!self.receiver.is_empty())
            .finish()
    }
}

/// Producer side of a [`TaskHandle`].
pub(crate) struct Completer<T> {
    sender: Sender<Result<T>>,
    token: CancellationToken,
}

impl<T> Completer<T> {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn complete(self, result: Result<T>) {
        // The handle may already be gone; nobody is waiting then.
        let _ = self.sender.try_send(result);
    }
}

/// Create a connected completer/handle pair.
///
/// `owner_thread` enables the deadlock guard in [`TaskHandle::wait`].
pub(crate) fn task_pair<T>(owner_thread: Option<ThreadId>) -> (Completer<T>, TaskHandle<T>) {
    let (sender, receiver) = bounded(1);
    let token = CancellationToken::new();
    let completer = Completer {
        sender,
        token: token.clone(),
    };
    let handle = TaskHandle {
        receiver,
        token,
        owner_thread,
    };
    (completer, handle)
}

/// A handle that is already resolved.
pub(crate) fn resolved<T>(result: Result<T>) -> TaskHandle<T> {
    let (completer, handle) = task_pair(None);
    completer.complete(result);
    handle
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_then_wait() {
        let (completer, handle) = task_pair::<u32>(None);
        completer.complete(Ok(7));
        assert_eq!(handle.wait(), Ok(7));
    }

    #[test]
    fn test_dropped_completer() {
        let (completer, handle) = task_pair::<u32>(None);
        drop(completer);
        assert_eq!(handle.wait(), Err(PagingError::TaskDropped));
    }

    #[test]
    fn test_cancel_is_visible_to_completer() {
        let (completer, handle) = task_pair::<()>(None);
        assert!(!completer.token().is_cancelled());
        handle.cancel();
        assert!(completer.token().is_cancelled());
        assert_eq!(completer.token().check(), Err(PagingError::Cancelled));
    }

    #[test]
    fn test_wait_on_owner_thread_is_rejected() {
        let (_completer, handle) = task_pair::<()>(Some(thread::current().id()));
        assert_eq!(handle.wait(), Err(PagingError::WaitOnOwnerThread));
    }

    #[test]
    fn test_ready_result_on_owner_thread() {
        let (completer, handle) = task_pair::<u8>(Some(thread::current().id()));
        completer.complete(Ok(1));
        assert_eq!(handle.wait(), Ok(1));
    }

    #[test]
    fn test_wait_timeout() {
        let (_completer, handle) = task_pair::<()>(None);
        assert_eq!(
            handle.wait_timeout(Duration::from_millis(20)),
            Err(PagingError::Timeout)
        );
    }

    #[test]
    fn test_try_wait() {
        let (completer, handle) = task_pair::<&str>(None);
        assert!(handle.try_wait().is_none());
        completer.complete(Ok("done"));
        assert_eq!(handle.try_wait(), Some(Ok("done")));
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");
    }
}
