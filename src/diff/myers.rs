//! Myers shortest-edit-script diff with move detection.
//!
//! The diff runs in three phases:
//! 1. Myers' algorithm, in its linear-space divide-and-conquer form, finds
//!    the longest run of matching items (by `are_items_the_same`) and the
//!    deletes/inserts around it.
//! 2. Optionally, each deleted item is paired with an inserted item that is
//!    the same entity, turning the pair into a move.
//! 3. The alignment is replayed against a working copy of the old list to
//!    produce positional updates: removals first (back to front), then
//!    inserts, moves and content changes front to back.
//!
//! Applying the resulting updates in order to the old list yields the new
//! list. Cancellation is checked between edit-distance steps, per move
//! candidate and per dispatched position; a cancelled diff produces nothing.

use super::callback::{BatchingCallback, ItemDiffer, ListUpdateCallback};
use crate::error::{PagingError, Result};
use crate::runtime::CancellationToken;
use crate::types::ListUpdate;
use std::ops::{Index, IndexMut, Range};

/// Ordered positional updates transforming one list into another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffResult<P> {
    updates: Vec<ListUpdate<P>>,
}

impl<P> DiffResult<P> {
    pub fn updates(&self) -> &[ListUpdate<P>] {
        &self.updates
    }

    pub fn into_updates(self) -> Vec<ListUpdate<P>> {
        self.updates
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Replay every update, in order, to a callback.
    pub fn dispatch_updates_to<C>(&self, callback: &mut C)
    where
        C: ListUpdateCallback<P> + ?Sized,
    {
        for update in &self.updates {
            update.dispatch(callback);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Edit {
    Same { old: usize, new: usize },
    Delete { old: usize },
    Insert { new: usize },
}

#[derive(Clone, Copy, Debug)]
enum Link {
    Same(usize),
    Moved(usize),
}

/// Working-list entry during dispatch: the new index it will end up at.
#[derive(Clone, Copy, Debug)]
struct Slot {
    new: usize,
    moved: bool,
}

/// Compute the updates that turn `old` into `new`.
pub fn calculate_diff<T, D>(
    old: &[T],
    new: &[T],
    differ: &D,
    detect_moves: bool,
    token: &CancellationToken,
) -> Result<DiffResult<D::Payload>>
where
    D: ItemDiffer<T> + ?Sized,
{
    let edits = shortest_edit(old, new, differ, token)?;

    let mut old_to_new: Vec<Option<Link>> = vec![None; old.len()];
    let mut new_to_old: Vec<Option<Link>> = vec![None; new.len()];
    let mut removed = Vec::new();
    let mut inserted = Vec::new();

    for edit in edits {
        match edit {
            Edit::Same { old: i, new: j } => {
                old_to_new[i] = Some(Link::Same(j));
                new_to_old[j] = Some(Link::Same(i));
            }
            Edit::Delete { old: i } => removed.push(i),
            Edit::Insert { new: j } => inserted.push(j),
        }
    }

    if detect_moves {
        for &j in &inserted {
            token.check()?;
            let candidate = removed.iter().copied().find(|&i| {
                old_to_new[i].is_none() && differ.are_items_the_same(&old[i], &new[j])
            });
            if let Some(i) = candidate {
                old_to_new[i] = Some(Link::Moved(j));
                new_to_old[j] = Some(Link::Moved(i));
            }
        }
    }

    let updates = build_updates(old, new, differ, &old_to_new, &new_to_old, token)?;
    Ok(DiffResult { updates })
}

/// Furthest-reaching x per diagonal `k`, for diagonals `-max_d..=max_d`.
struct Frontier {
    v: Vec<usize>,
    offset: isize,
}

impl Frontier {
    fn new(max_d: usize) -> Self {
        Self {
            v: vec![0; 2 * max_d + 1],
            offset: max_d as isize,
        }
    }
}

impl Index<isize> for Frontier {
    type Output = usize;

    fn index(&self, k: isize) -> &usize {
        &self.v[(k + self.offset) as usize]
    }
}

impl IndexMut<isize> for Frontier {
    fn index_mut(&mut self, k: isize) -> &mut usize {
        &mut self.v[(k + self.offset) as usize]
    }
}

/// Edit steps needed before the forward and backward searches must meet.
fn max_d(n: usize, m: usize) -> usize {
    (n + m + 1) / 2 + 1
}

/// Linear-space Myers: split at the middle snake, recurse on both halves.
struct Search<'a, T, D: ?Sized> {
    old: &'a [T],
    new: &'a [T],
    differ: &'a D,
    token: &'a CancellationToken,
    forward: Frontier,
    backward: Frontier,
    edits: Vec<Edit>,
}

fn shortest_edit<T, D>(
    old: &[T],
    new: &[T],
    differ: &D,
    token: &CancellationToken,
) -> Result<Vec<Edit>>
where
    D: ItemDiffer<T> + ?Sized,
{
    let max_d = max_d(old.len(), new.len());
    let mut search = Search {
        old,
        new,
        differ,
        token,
        forward: Frontier::new(max_d),
        backward: Frontier::new(max_d),
        edits: Vec::with_capacity(old.len().max(new.len())),
    };
    search.conquer(0..old.len(), 0..new.len())?;
    Ok(search.edits)
}

impl<T, D> Search<'_, T, D>
where
    D: ItemDiffer<T> + ?Sized,
{
    fn same(&self, i: usize, j: usize) -> bool {
        self.differ.are_items_the_same(&self.old[i], &self.new[j])
    }

    fn common_prefix(&self, old: Range<usize>, new: Range<usize>) -> usize {
        old.zip(new).take_while(|&(i, j)| self.same(i, j)).count()
    }

    fn common_suffix(&self, old: Range<usize>, new: Range<usize>) -> usize {
        old.rev()
            .zip(new.rev())
            .take_while(|&(i, j)| self.same(i, j))
            .count()
    }

    /// Append the edits for `old` against `new`, in order.
    fn conquer(&mut self, mut old: Range<usize>, mut new: Range<usize>) -> Result<()> {
        self.token.check()?;

        let prefix = self.common_prefix(old.clone(), new.clone());
        self.edits.extend((0..prefix).map(|offset| Edit::Same {
            old: old.start + offset,
            new: new.start + offset,
        }));
        old.start += prefix;
        new.start += prefix;

        let suffix = self.common_suffix(old.clone(), new.clone());
        old.end -= suffix;
        new.end -= suffix;

        if old.is_empty() {
            self.edits.extend(new.clone().map(|j| Edit::Insert { new: j }));
        } else if new.is_empty() {
            self.edits.extend(old.clone().map(|i| Edit::Delete { old: i }));
        } else if let Some((x, y)) = self.middle_snake(old.clone(), new.clone())? {
            self.conquer(old.start..x, new.start..y)?;
            self.conquer(x..old.end, y..new.end)?;
        } else {
            self.edits.extend(old.clone().map(|i| Edit::Delete { old: i }));
            self.edits.extend(new.clone().map(|j| Edit::Insert { new: j }));
        }

        self.edits.extend((0..suffix).map(|offset| Edit::Same {
            old: old.end + offset,
            new: new.end + offset,
        }));
        Ok(())
    }

    /// Start of a snake on an optimal path through `old` x `new`, found by
    /// searching from both corners until the two frontiers overlap.
    fn middle_snake(&mut self, old: Range<usize>, new: Range<usize>) -> Result<Option<(usize, usize)>> {
        let n = old.len();
        let m = new.len();
        let delta = n as isize - m as isize;
        let odd = delta & 1 == 1;

        self.forward[1] = 0;
        self.backward[1] = 0;

        for d in 0..max_d(n, m) as isize {
            self.token.check()?;

            let mut k = d;
            while k >= -d {
                let mut x = if k == -d || (k != d && self.forward[k - 1] < self.forward[k + 1]) {
                    self.forward[k + 1]
                } else {
                    self.forward[k - 1] + 1
                };
                let y = (x as isize - k) as usize;
                let start = (x, y);
                if x < n && y < m {
                    x += self.common_prefix(old.start + x..old.end, new.start + y..new.end);
                }
                self.forward[k] = x;

                if odd && (k - delta).abs() < d && x + self.backward[delta - k] >= n {
                    return Ok(Some((old.start + start.0, new.start + start.1)));
                }
                k -= 2;
            }

            let mut k = d;
            while k >= -d {
                let mut x = if k == -d || (k != d && self.backward[k - 1] < self.backward[k + 1]) {
                    self.backward[k + 1]
                } else {
                    self.backward[k - 1] + 1
                };
                let mut y = (x as isize - k) as usize;
                if x < n && y < m {
                    let advance =
                        self.common_suffix(old.start..old.end - x, new.start..new.end - y);
                    x += advance;
                    y += advance;
                }
                self.backward[k] = x;

                if !odd && (k - delta).abs() <= d && x + self.forward[delta - k] >= n {
                    return Ok(Some((old.end - x, new.end - y)));
                }
                k -= 2;
            }
        }

        Ok(None)
    }
}

fn build_updates<T, D>(
    old: &[T],
    new: &[T],
    differ: &D,
    old_to_new: &[Option<Link>],
    new_to_old: &[Option<Link>],
    token: &CancellationToken,
) -> Result<Vec<ListUpdate<D::Payload>>>
where
    D: ItemDiffer<T> + ?Sized,
{
    let mut batch = BatchingCallback::new(Vec::new());

    // Back to front, so each removal position is still the old index.
    for i in (0..old.len()).rev() {
        if old_to_new[i].is_none() {
            batch.on_removed(i, 1);
        }
    }

    let mut slots: Vec<Slot> = old_to_new
        .iter()
        .filter_map(|link| match link {
            Some(Link::Same(j)) => Some(Slot {
                new: *j,
                moved: false,
            }),
            Some(Link::Moved(j)) => Some(Slot {
                new: *j,
                moved: true,
            }),
            None => None,
        })
        .collect();

    // Invariant: slots[..j] already equals new[..j].
    for j in 0..new.len() {
        token.check()?;

        let old_index = match new_to_old[j] {
            None => {
                slots.insert(
                    j,
                    Slot {
                        new: j,
                        moved: false,
                    },
                );
                batch.on_inserted(j, 1);
                continue;
            }
            Some(Link::Moved(i)) => {
                let position = locate(&slots, j)?;
                if position != j {
                    let slot = slots.remove(position);
                    slots.insert(j, slot);
                    batch.on_moved(position, j);
                }
                i
            }
            Some(Link::Same(i)) => {
                // Anything in front of a kept item is a moved item that has
                // not reached its target yet. Push it ahead of the first kept
                // item that follows its target so it moves exactly once.
                let mut position = locate(&slots, j)?;
                while position > j {
                    let slot = slots.remove(j);
                    let dest = slots[j..]
                        .iter()
                        .position(|s| !s.moved && s.new > slot.new)
                        .map_or(slots.len(), |offset| j + offset);
                    slots.insert(dest, slot);
                    batch.on_moved(j, dest);
                    position -= 1;
                }
                i
            }
        };

        if !differ.are_contents_the_same(&old[old_index], &new[j]) {
            let payload = differ.change_payload(&old[old_index], &new[j]);
            batch.on_changed(j, 1, payload.as_ref());
        }
    }

    Ok(batch.into_inner())
}

/// Position of the slot bound for `new_index`. Every matched item has one
/// at or after its target.
fn locate(slots: &[Slot], new_index: usize) -> Result<usize> {
    slots
        .get(new_index..)
        .and_then(|rest| rest.iter().position(|slot| slot.new == new_index))
        .map(|offset| new_index + offset)
        .ok_or(PagingError::InconsistentPatch(new_index))
}
