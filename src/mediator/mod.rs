//! Store-in mediator for paged lists.
//!
//! A [`PagingMediator`] owns the shared list (through an
//! [`AsyncListDiffer`](crate::diff::AsyncListDiffer)) and sits between one
//! upstream [`Pager`](crate::paging::Pager) and one downstream subscriber:
//! - upstream list updates are applied to the shared list and forwarded
//! - external callers can mutate the shared list directly
//! - a new subscriber receives a snapshot, never a replay
//! - a subscriber that falls `buffer_size` events behind is dropped
//!
//! # Example
//!
//! ```ignore
//! let mediator = PagingMediator::new(runtime.clone(), EqDiffer::new(), adapter, MediatorConfig::default())?;
//! mediator.submit_pager(Pager::new(runtime, source, None, PagingConfig::default())?);
//!
//! let subscription = mediator.subscribe()?;
//! while let Ok(event) = subscription.recv() {
//!     match event {
//!         PagingEvent::LoadStateUpdate { states, .. } => show_spinner(&states),
//!         PagingEvent::LoadDataSuccess { .. } => {}
//!         PagingEvent::ListStateUpdate { op, .. } => apply(op),
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::PagingMediator;
pub use types::{MediatorConfig, PagingSubscription, SubscriptionId};
