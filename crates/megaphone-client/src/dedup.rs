//! Bounded window of recently seen event ids.
//!
//! The broker may redeliver events after a read is reopened. The window
//! remembers the last `capacity` event ids and evicts the oldest one first
//! (insertion order, not recency of lookup). An id evicted from the window
//! is treated as new if it shows up again.

use std::collections::{HashSet, VecDeque};

pub struct DedupWindow {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl DedupWindow {
    /// Create a window retaining at most `capacity` ids.
    ///
    /// A zero capacity is raised to one so the most recent id is always retained.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Whether the id is currently retained
    pub fn seen(&self, event_id: &str) -> bool {
        self.members.contains(event_id)
    }

    /// Record an id, evicting the oldest once capacity is exceeded.
    ///
    /// Recording an id already in the window is a no-op.
    pub fn record(&mut self, event_id: &str) {
        if self.members.contains(event_id) {
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        self.order.push_back(event_id.to_string());
        self.members.insert(event_id.to_string());
    }

    /// Record the id if unseen. Returns `false` for a duplicate.
    pub fn observe(&mut self, event_id: &str) -> bool {
        if self.seen(event_id) {
            return false;
        }
        self.record(event_id);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
