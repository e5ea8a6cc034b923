//! Reorder buffer restoring admission order after concurrent work.

use std::collections::{HashMap, VecDeque};
use tl_types::BatchId;

/// Holds completed items until every item admitted before them is complete.
///
/// Items are admitted in the order they must be released. Completions may
/// arrive in any order; [`pop_ready`](Self::pop_ready) only releases the
/// contiguous completed prefix.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    admitted: VecDeque<BatchId>,
    completed: HashMap<BatchId, T>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        Self {
            admitted: VecDeque::new(),
            completed: HashMap::new(),
        }
    }

    /// Registers `id` as the next item in release order.
    pub fn admit(&mut self, id: BatchId) {
        debug_assert!(
            self.admitted.back().is_none_or(|&last| id > last),
            "batch {} admitted out of order",
            id
        );
        self.admitted.push_back(id);
    }

    /// Stores the finished item for `id`.
    pub fn complete(&mut self, id: BatchId, item: T) {
        debug_assert!(self.admitted.contains(&id), "batch {} was never admitted", id);
        self.completed.insert(id, item);
    }

    /// Releases the oldest admitted item if it is complete.
    pub fn pop_ready(&mut self) -> Option<(BatchId, T)> {
        let front = *self.admitted.front()?;
        let item = self.completed.remove(&front)?;
        self.admitted.pop_front();
        Some((front, item))
    }

    /// Items admitted but not yet released.
    pub fn in_flight(&self) -> usize {
        self.admitted.len()
    }

    /// Completed items held back by an unfinished predecessor.
    pub fn held(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }
}
