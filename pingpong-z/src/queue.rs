//! Bounded inbound queue that keeps the newest `capacity` items.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Drops the OLDEST item when full, which is what a `KeepLast(depth)`
/// history means for a subscriber that falls behind. Readers poll with
/// [`BoundedQueue::try_recv`]; wake-ups go through the subscriber's notifier.
pub struct BoundedQueue<T> {
    data: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// `usize::MAX` makes the queue effectively unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Returns `true` if an older item was evicted to make room.
    pub fn push(&self, item: T) -> bool {
        let mut data = self.data.lock();
        let dropped = if data.len() >= self.capacity {
            data.pop_front();
            true
        } else {
            false
        };
        data.push_back(item);
        dropped
    }

    pub fn try_recv(&self) -> Option<T> {
        self.data.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }
}
