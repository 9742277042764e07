//! Execution contexts.
//!
//! Two contexts cooperate:
//! - the **owner context**, one thread that serializes every list mutation,
//!   callback dispatch and load-state transition
//! - the **worker pool**, which runs diff computation and data-source loads
//!
//! Results computed on workers are always posted back to the owner before
//! any shared state is touched.
//!
//! # Example
//!
//! ```ignore
//! let runtime = Runtime::new(RuntimeConfig::default())?;
//!
//! let handle = runtime.spawn(|token| {
//!     token.check()?;
//!     Ok(expensive())
//! });
//! let value = handle.wait()??;
//! ```

mod owner;
mod pool;
mod task;

pub use owner::OwnerContext;
pub use pool::WorkerPool;
pub use task::{CancellationToken, TaskHandle};

pub(crate) use task::{panic_message, resolved, task_pair, Completer};

use crate::error::{PagingError, Result};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Runtime configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads.
    /// Default: 2
    pub worker_threads: usize,

    /// Prefix for thread names.
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            thread_name: "pagelist".to_string(),
        }
    }
}

struct RuntimeInner {
    owner: OwnerContext,
    workers: WorkerPool,
}

/// Shared handle to an owner context plus its worker pool.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Start the owner thread and the worker pool.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        if config.worker_threads == 0 {
            return Err(PagingError::InvalidConfig(
                "worker_threads must be at least 1".to_string(),
            ));
        }

        let owner = OwnerContext::start(format!("{}-owner", config.thread_name))?;
        let workers = WorkerPool::start(config.worker_threads, &config.thread_name)?;

        tracing::debug!(workers = config.worker_threads, "runtime started");

        Ok(Self {
            inner: Arc::new(RuntimeInner { owner, workers }),
        })
    }

    pub fn owner(&self) -> &OwnerContext {
        &self.inner.owner
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.inner.workers
    }

    /// Run a cancellable computation on the worker pool.
    ///
    /// A task cancelled before a worker picks it up never runs. Panics
    /// resolve the handle with `TaskPanicked`.
    pub fn spawn<R, F>(&self, f: F) -> TaskHandle<R>
    where
        R: Send + 'static,
        F: FnOnce(&CancellationToken) -> R + Send + 'static,
    {
        let (completer, handle) = self.task();
        self.inner.workers.execute(move || {
            if completer.token().is_cancelled() {
                completer.complete(Err(PagingError::Cancelled));
                return;
            }
            let token = completer.token().clone();
            let result = panic::catch_unwind(AssertUnwindSafe(|| f(&token)))
                .map_err(|payload| PagingError::TaskPanicked(panic_message(payload.as_ref())));
            completer.complete(result);
        });
        handle
    }

    /// A completer/handle pair whose handle refuses to block the owner.
    pub(crate) fn task<T>(&self) -> (Completer<T>, TaskHandle<T>) {
        task_pair(Some(self.inner.owner.thread_id()))
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.inner.workers.size())
            .finish()
    }
}
