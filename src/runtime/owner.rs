//! The single-threaded owner context.

use super::task::panic_message;
use crossbeam_channel::{unbounded, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, ThreadId};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Serial executor that owns all list and load-state mutation.
///
/// Jobs run one at a time, in the order they were posted. The thread exits
/// once every handle to the context is dropped and the queue is drained.
pub struct OwnerContext {
    sender: Sender<Job>,
    thread_id: ThreadId,
}

impl OwnerContext {
    pub(crate) fn start(name: String) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<Job>();

        let handle = thread::Builder::new().name(name).spawn(move || {
            for job in receiver {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    tracing::error!(
                        panic = %panic_message(payload.as_ref()),
                        "owner job panicked"
                    );
                }
            }
            tracing::debug!("owner context stopped");
        })?;

        Ok(Self {
            sender,
            thread_id: handle.thread().id(),
        })
    }

    /// Queue a job behind everything already posted.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Box::new(job)).is_err() {
            tracing::warn!("owner context is gone; job dropped");
        }
    }

    /// Whether the calling thread is the owner thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub(crate) fn thread_id(&self) -> ThreadId {
        self.thread_id
    }
}
