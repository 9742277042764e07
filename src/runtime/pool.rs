//! Background worker pool for diff computation and data-source loads.

use super::owner::Job;
use super::task::panic_message;
use crossbeam_channel::{unbounded, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::thread;

/// Fixed-size pool of worker threads sharing one job queue.
///
/// Workers never touch owned state; they compute values and post results
/// back to the [`OwnerContext`](super::OwnerContext).
pub struct WorkerPool {
    sender: Sender<Job>,
    size: usize,
}

impl WorkerPool {
    pub(crate) fn start(size: usize, name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<Job>();

        for index in 0..size {
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("{name}-worker-{index}"))
                .spawn(move || {
                    for job in receiver {
                        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                            tracing::error!(
                                panic = %panic_message(payload.as_ref()),
                                "worker job panicked"
                            );
                        }
                    }
                })?;
        }

        Ok(Self { sender, size })
    }

    /// Queue a job for the next free worker.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Box::new(job)).is_err() {
            tracing::warn!("worker pool is gone; job dropped");
        }
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.size
    }
}
