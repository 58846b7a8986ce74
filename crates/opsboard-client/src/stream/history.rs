use std::collections::VecDeque;

use super::event::RunEvent;

/// Bounded, consumer-owned retention of received events.
///
/// Oldest events are evicted first once `capacity` is reached.
#[derive(Clone, Debug)]
pub struct EventHistory {
    capacity: usize,
    events: VecDeque<RunEvent>,
    evicted: u64,
}

impl EventHistory {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity.min(1024)),
            evicted: 0,
        }
    }

    pub fn push(&mut self, event: RunEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.evicted += 1;
        }
        self.events.push_back(event);
    }

    pub fn iter(&self) -> impl Iterator<Item = &RunEvent> {
        self.events.iter()
    }

    pub fn latest(&self) -> Option<&RunEvent> {
        self.events.back()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped to respect the capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
