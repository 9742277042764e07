//! List diffing.
//!
//! [`calculate_diff`] turns two lists into a sequence of positional updates
//! (Myers shortest edit script plus optional move detection).
//! [`AsyncListDiffer`] owns a list and applies a queue of
//! [`UpdateOp`](crate::types::UpdateOp)s to it in order, computing diffs
//! off the owner thread.
//!
//! # Example
//!
//! ```ignore
//! let differ = AsyncListDiffer::new(
//!     runtime,
//!     KeyDiffer::new(|row: &Row| row.id),
//!     Vec::<ListUpdate<()>>::new(),
//!     DifferConfig::default(),
//! );
//!
//! differ.update_list(UpdateOp::SubmitList(rows));
//! let version = differ.await_update_list(UpdateOp::AddItem(0, header))?;
//! ```

mod callback;
mod differ;
mod myers;

pub use callback::{BatchingCallback, EqDiffer, ItemDiffer, KeyDiffer, ListUpdateCallback};
pub use differ::{AsyncListDiffer, DifferConfig, ListSnapshot};
pub use myers::{calculate_diff, DiffResult};
