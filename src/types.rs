//! Core list mutation types.

use crate::diff::ListUpdateCallback;
use crate::error::{PagingError, Result};

/// A single list-mutation instruction.
///
/// `SubmitList` replaces the whole list and is applied through a diff; every
/// other variant is patched directly against the current list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOp<T> {
    /// Replace the list with a new one.
    SubmitList(Vec<T>),
    /// Replace the item at a position.
    SetItem(usize, T),
    /// Replace a run of items starting at a position.
    SetItems(usize, Vec<T>),
    /// Insert an item at a position (`position == len` appends).
    AddItem(usize, T),
    /// Insert items at a position (`position == len` appends).
    AddItems(usize, Vec<T>),
    /// Remove `count` items starting at a position.
    RemoveItems(usize, usize),
    /// Move the item at `from` so that it ends up at `to`.
    MoveItem(usize, usize),
}

impl<T> UpdateOp<T> {
    /// Whether this op replaces the whole list.
    pub fn is_submit_list(&self) -> bool {
        matches!(self, UpdateOp::SubmitList(_))
    }

    /// Check that the op can be applied to a list of `len` items.
    pub fn validate(&self, len: usize) -> Result<()> {
        let out_of_bounds = |index: usize| Err(PagingError::IndexOutOfBounds { index, len });

        match self {
            UpdateOp::SubmitList(_) => Ok(()),
            UpdateOp::SetItem(position, _) => {
                if *position >= len {
                    return out_of_bounds(*position);
                }
                Ok(())
            }
            UpdateOp::SetItems(position, items) => {
                let end = position.saturating_add(items.len());
                if end > len {
                    return out_of_bounds(end);
                }
                Ok(())
            }
            UpdateOp::AddItem(position, _) | UpdateOp::AddItems(position, _) => {
                if *position > len {
                    return out_of_bounds(*position);
                }
                Ok(())
            }
            UpdateOp::RemoveItems(position, count) => {
                // Saturates, so an overflowing range still exceeds `len`.
                let end = position.saturating_add(*count);
                if end > len {
                    return out_of_bounds(end);
                }
                Ok(())
            }
            UpdateOp::MoveItem(from, to) => {
                if *from >= len {
                    return out_of_bounds(*from);
                }
                if *to >= len {
                    return out_of_bounds(*to);
                }
                Ok(())
            }
        }
    }
}

impl<T: Clone> UpdateOp<T> {
    /// Apply the op to a list in place.
    ///
    /// The list is left untouched when the op is out of bounds.
    pub fn apply(&self, list: &mut Vec<T>) -> Result<()> {
        self.validate(list.len())?;

        match self {
            UpdateOp::SubmitList(items) => {
                list.clear();
                list.extend_from_slice(items);
            }
            UpdateOp::SetItem(position, item) => {
                list[*position] = item.clone();
            }
            UpdateOp::SetItems(position, items) => {
                list[*position..position + items.len()].clone_from_slice(items);
            }
            UpdateOp::AddItem(position, item) => {
                list.insert(*position, item.clone());
            }
            UpdateOp::AddItems(position, items) => {
                list.splice(*position..*position, items.iter().cloned());
            }
            UpdateOp::RemoveItems(position, count) => {
                list.drain(*position..position + count);
            }
            UpdateOp::MoveItem(from, to) => {
                let item = list.remove(*from);
                list.insert(*to, item);
            }
        }

        Ok(())
    }
}

/// An applied update, stamped with the list version it produced.
///
/// Versions increase by one per applied op, per list instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEvent<T> {
    pub version: u64,
    pub op: UpdateOp<T>,
}

/// A positional change notification, as delivered to a
/// [`ListUpdateCallback`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListUpdate<P> {
    Inserted { position: usize, count: usize },
    Removed { position: usize, count: usize },
    Moved { from: usize, to: usize },
    Changed {
        position: usize,
        count: usize,
        payload: Option<P>,
    },
}

impl<P> ListUpdate<P> {
    /// Forward this update to a callback.
    pub fn dispatch<C>(&self, callback: &mut C)
    where
        C: ListUpdateCallback<P> + ?Sized,
    {
        match self {
            ListUpdate::Inserted { position, count } => callback.on_inserted(*position, *count),
            ListUpdate::Removed { position, count } => callback.on_removed(*position, *count),
            ListUpdate::Moved { from, to } => callback.on_moved(*from, *to),
            ListUpdate::Changed {
                position,
                count,
                payload,
            } => callback.on_changed(*position, *count, payload.as_ref()),
        }
    }
}
