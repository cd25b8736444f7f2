//! BinaryHeap-based timer ordering
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Cancel: O(1) (lazy)
//! - Pop expired: O(k log n) for k expired timers
//! - Next deadline: O(1) amortized
//!
//! Cancelled handles are dropped from the live set and their heap
//! entries are skipped when they surface.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Instant;

use super::entry::{TimerEntry, TimerHandle};

/// Min-heap ordering by deadline, ties broken by handle
struct HeapEntry(TimerEntry);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline == other.0.deadline && self.0.handle == other.0.handle
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.0.deadline.cmp(&self.0.deadline) {
            Ordering::Equal => other.0.handle.cmp(&self.0.handle),
            ord => ord,
        }
    }
}

#[derive(Default)]
pub struct TimerHeap {
    heap: BinaryHeap<HeapEntry>,
    live: HashSet<TimerHandle>,
}

impl TimerHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: TimerEntry) -> TimerHandle {
        let handle = entry.handle;
        self.live.insert(handle);
        self.heap.push(HeapEntry(entry));
        handle
    }

    /// Returns true if the timer was live
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let was_live = self.live.remove(&handle);
        if self.live.is_empty() {
            self.heap.clear();
        }
        was_live
    }

    #[inline]
    pub fn is_live(&self, handle: TimerHandle) -> bool {
        self.live.contains(&handle)
    }

    /// Remove and return every live entry due at `now`, earliest first.
    ///
    /// Repeating entries are re-armed for their next period and stay live.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<TimerEntry> {
        let mut expired = Vec::new();
        let mut rearm = Vec::new();

        while self.heap.peek().is_some_and(|e| e.0.deadline <= now) {
            let Some(HeapEntry(entry)) = self.heap.pop() else {
                break;
            };
            if !self.live.contains(&entry.handle) {
                continue;
            }
            match entry.reschedule() {
                Some(next) => rearm.push(next),
                None => {
                    self.live.remove(&entry.handle);
                }
            }
            expired.push(entry);
        }

        self.heap.extend(rearm.into_iter().map(HeapEntry));
        expired
    }

    /// Earliest live deadline
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(top) = self.heap.peek() {
            if self.live.contains(&top.0.handle) {
                return Some(top.0.deadline);
            }
            self.heap.pop();
        }
        None
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }
}
