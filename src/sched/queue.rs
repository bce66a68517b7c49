//! Timestamp-ordered priority queue.
//!
//! A hand-rolled binary min-heap keyed on `(timestamp, generation)`. The
//! generation counter is a monotone insertion index, so tasks with equal
//! timestamps leave the heap in enqueue order. The scheduler contract
//! only promises *some* minimal-timestamp task per pop; the FIFO
//! tie-break is what makes single-worker runs reproducible.
//!
//! `peek_min_ts` is O(1): the head of the heap is always a minimal
//! element. Workers read it to refresh their progress bound before
//! invoking a task.

use crate::task::{Task, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HeapKey {
    ts: Timestamp,
    generation: u64,
}

struct HeapEntry {
    key: HeapKey,
    task: Task,
}

/// A binary min-heap of tasks keyed on timestamp.
#[derive(Default)]
pub struct TimestampHeap {
    entries: Vec<HeapEntry>,
    next_generation: u64,
}

impl TimestampHeap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_generation: 0,
        }
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no tasks are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The minimum queued timestamp, if any.
    #[must_use]
    pub fn peek_min_ts(&self) -> Option<Timestamp> {
        self.entries.first().map(|e| e.key.ts)
    }

    /// Inserts a task. O(log n).
    pub fn push(&mut self, task: Task) {
        let key = HeapKey {
            ts: task.ts(),
            generation: self.next_generation,
        };
        self.next_generation += 1;
        self.entries.push(HeapEntry { key, task });
        self.sift_up(self.entries.len() - 1);
    }

    /// Removes and returns a minimal-timestamp task. O(log n).
    #[must_use]
    pub fn pop_top(&mut self) -> Option<Task> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.entries.swap(0, last);
        let entry = self.entries.pop().expect("heap verified non-empty");
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        Some(entry.task)
    }

    /// Drains every task in key order.
    pub(crate) fn drain_ordered(&mut self) -> Vec<Task> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some(task) = self.pop_top() {
            out.push(task);
        }
        out
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.entries[parent].key <= self.entries[idx].key {
                break;
            }
            self.entries.swap(parent, idx);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * idx + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut smallest = idx;
            if self.entries[left].key < self.entries[smallest].key {
                smallest = left;
            }
            if right < len && self.entries[right].key < self.entries[smallest].key {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.entries.swap(idx, smallest);
            idx = smallest;
        }
    }
}

impl std::fmt::Debug for TimestampHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampHeap")
            .field("len", &self.entries.len())
            .field("min_ts", &self.peek_min_ts())
            .finish()
    }
}
