//! Incremental loading.
//!
//! A [`Pager`] drives a [`LoadStateMachine`] against a caller-supplied
//! [`PagingSource`] and emits [`PagingEvent`]s:
//! - `LoadStateUpdate` on every load-state transition
//! - `LoadDataSuccess` when a load returns data
//! - `ListStateUpdate` with the list mutation that data implies
//!
//! For each load these arrive in exactly that order.
//!
//! # Example
//!
//! ```ignore
//! let pager = Pager::new(runtime, FeedSource::new(client), None, PagingConfig::new(30))?;
//! let events = pager.events();
//!
//! pager.refresh().wait()?;
//! for event in events.try_iter() {
//!     render(event);
//! }
//! ```

mod pager;
mod source;
mod state;
mod types;

pub use pager::{Pager, PagingEventSink};
pub use source::{PagingConfig, PagingSource};
pub use state::{LoadRequest, LoadStateMachine};
pub use types::{LoadError, LoadParams, LoadResult, LoadState, LoadStates, LoadType, PagingEvent};
