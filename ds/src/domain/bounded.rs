//! Bounded FIFO collection
//!
//! Every list embedded in the dashboard document that can grow without limit
//! (alerts, activity feed) goes through `BoundedList`. Pushing past the
//! capacity evicts from the front, so the newest entries always survive.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A list capped at `capacity` entries, oldest evicted first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawBoundedList<T>")]
pub struct BoundedList<T> {
    capacity: usize,
    items: VecDeque<T>,
}

/// Wire shape; re-checked against the capacity on the way in
#[derive(Deserialize)]
struct RawBoundedList<T> {
    capacity: usize,
    #[serde(default = "VecDeque::new")]
    items: VecDeque<T>,
}

impl<T> From<RawBoundedList<T>> for BoundedList<T> {
    fn from(raw: RawBoundedList<T>) -> Self {
        let mut list = Self {
            capacity: raw.capacity.max(1),
            items: raw.items,
        };
        let evicted = list.trim();
        if evicted > 0 {
            debug!(evicted, capacity = list.capacity, "BoundedList: trimmed oversized input");
        }
        list
    }
}

impl<T> BoundedList<T> {
    /// Create an empty list; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append an item, returning how many old entries were evicted to make room
    pub fn push(&mut self, item: T) -> usize {
        self.items.push_back(item);
        self.trim()
    }

    /// Append items in order, returning the total number evicted
    pub fn extend<I: IntoIterator<Item = T>>(&mut self, items: I) -> usize {
        items.into_iter().map(|item| self.push(item)).sum()
    }

    /// Change the capacity, evicting the oldest entries if the list no longer fits
    pub fn set_capacity(&mut self, capacity: usize) -> usize {
        self.capacity = capacity.max(1);
        self.trim()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Most recently pushed entry
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn retain<F: FnMut(&T) -> bool>(&mut self, f: F) {
        self.items.retain(f);
    }

    fn trim(&mut self) -> usize {
        let mut evicted = 0;
        while self.items.len() > self.capacity {
            self.items.pop_front();
            evicted += 1;
        }
        evicted
    }
}

impl<'a, T> IntoIterator for &'a BoundedList<T> {
    type Item = &'a T;
    type IntoIter = std::collections::vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
