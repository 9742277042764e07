//! # Paged List Engine
//!
//! Ordered, cancellable list updates plus incremental loading.
//!
//! ## Core Concepts
//!
//! - **Owner context**: One thread that applies every list mutation and
//!   load-state transition, in order
//! - **List differ**: Applies a FIFO queue of `UpdateOp`s; list submissions
//!   are diffed on workers and superseded submissions are never applied
//! - **Pager**: Refresh/append/retry state machine over a `PagingSource`
//! - **Mediator**: Shares one differ-backed list between a pager, external
//!   mutations and a single subscriber
//!
//! ## Example
//!
//! ```ignore
//! use pagelist::{EqDiffer, MediatorConfig, Pager, PagingConfig, PagingMediator, Runtime, RuntimeConfig};
//!
//! let runtime = Runtime::new(RuntimeConfig::default())?;
//! let mediator = PagingMediator::new(
//!     runtime.clone(),
//!     EqDiffer::new(),
//!     Vec::new(),
//!     MediatorConfig::default(),
//! )?;
//!
//! mediator.submit_pager(Pager::new(runtime, source, None, PagingConfig::new(30))?).wait()?;
//! mediator.append()?.wait()?;
//!
//! let subscription = mediator.subscribe()?;
//! let snapshot = subscription.recv()?;
//! ```

pub mod diff;
pub mod error;
pub mod mediator;
pub mod paging;
pub mod runtime;
pub mod types;

// Re-exports
pub use diff::{
    calculate_diff, AsyncListDiffer, BatchingCallback, DiffResult, DifferConfig, EqDiffer,
    ItemDiffer, KeyDiffer, ListSnapshot, ListUpdateCallback,
};
pub use error::{PagingError, Result};
pub use mediator::{MediatorConfig, PagingMediator, PagingSubscription, SubscriptionId};
pub use paging::{
    LoadError, LoadParams, LoadRequest, LoadResult, LoadState, LoadStateMachine, LoadStates,
    LoadType, Pager, PagingConfig, PagingEvent, PagingEventSink, PagingSource,
};
pub use runtime::{CancellationToken, OwnerContext, Runtime, RuntimeConfig, TaskHandle, WorkerPool};
pub use types::{ListEvent, ListUpdate, UpdateOp};
